//! `wait`: no handler work; the gating lives in graph readiness.

use super::registry::HandlerCtx;
use crate::error::Result;
use crate::tasks::TaskNode;

pub async fn handle(_ctx: &HandlerCtx, _task: &TaskNode) -> Result<()> {
    Ok(())
}
