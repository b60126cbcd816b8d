//! Channel-details prompt section: who the agent is talking to.

use crate::chat::EntityInfo;

/// Render the partner/channel details block. Direct messages surface the
/// person's profile; groups and channels surface room metadata.
pub fn build_channel_details_section(entity: &EntityInfo, is_group: bool) -> String {
    let mut lines = vec!["# Channel Details".to_string(), String::new()];

    if is_group {
        lines.push(format!("You are in the group or channel: {}", entity.display_name()));
        if let Some(count) = entity.participants_count {
            lines.push(format!("Participants: {count}"));
        }
        if let Some(count) = entity.admins_count {
            lines.push(format!("Admins: {count}"));
        }
        if let Some(about) = entity.about.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Description: {about}"));
        }
        if let Some(photo) = entity.photo_description.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Profile photo: {photo}"));
        }
    } else {
        lines.push(format!(
            "You are in a direct conversation with: {}",
            entity.display_name()
        ));
        if let Some(username) = entity.username.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Username: @{username}"));
        }
        if let Some(bio) = entity.bio.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Bio: {bio}"));
        }
        if let Some(birthday) = entity.birthday.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Birthday: {birthday}"));
        }
        if let Some(phone) = entity.phone.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Phone: {phone}"));
        }
    }

    lines.join("\n")
}
