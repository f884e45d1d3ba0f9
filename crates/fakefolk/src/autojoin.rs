use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::AutoJoinConfig;
use crate::engine::EngineHandle;
use crate::error::EngineError;
use crate::timer::{self, CancelToken};

/// Start creating one pool-named identity per round: first after
/// `startup_delay_s`, then after a random pick from `delay`.
///
/// Returns `None` when auto-join is disabled. Drop the token to stop.
pub fn start(engine: EngineHandle, cfg: &AutoJoinConfig) -> Option<CancelToken> {
    if !cfg.enabled {
        return None;
    }
    let startup = Duration::from_secs(cfg.startup_delay_s);
    let range = cfg.delay;
    info!(
        startup_delay_s = cfg.startup_delay_s,
        min_s = range.min_s,
        max_s = range.max_s,
        "auto-join enabled"
    );
    let token = timer::recurring(
        move |round| if round == 0 { startup } else { range.pick() },
        move || {
            let engine = engine.clone();
            async move {
                match engine.create(None).await {
                    Ok(id) => debug!(id = %id, "auto-join created an identity"),
                    Err(EngineError::CapacityExceeded { max }) => {
                        debug!(max, "auto-join skipped; at capacity")
                    }
                    Err(e) => warn!(err = %e, "auto-join create failed"),
                }
            }
        },
    );
    Some(token)
}
