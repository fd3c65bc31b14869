use crate::engine::executor::{ExecEnv, Executor};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Run length for a button-started zone.
pub const BUTTON_RUN_SECS: i64 = 900;
/// Quiet time after the last press before the selection commits.
pub const BUTTON_SETTLE_SECS: u64 = 2;

/// Physical-button walk-through: each press advances the selection; two
/// quiet seconds commit it and start that zone. Advancing past the last
/// zone parks the cycle without starting anything.
#[derive(Clone)]
pub struct ButtonWalk {
    tx: mpsc::UnboundedSender<()>,
}

impl ButtonWalk {
    pub fn start(executor: Executor, env: Arc<RwLock<ExecEnv>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(walk_task(rx, executor, env));
        Self { tx }
    }

    pub fn press(&self) {
        let _ = self.tx.send(());
    }
}

async fn walk_task(mut rx: mpsc::UnboundedReceiver<()>, executor: Executor, env: Arc<RwLock<ExecEnv>>) {
    loop {
        if rx.recv().await.is_none() {
            return;
        }
        let mut index: usize = 0;
        loop {
            match tokio::time::timeout(Duration::from_secs(BUTTON_SETTLE_SECS), rx.recv()).await {
                Ok(Some(())) => index += 1,
                Ok(None) => return,
                Err(_) => break, // settled
            }
        }
        let count = env.read().unwrap().zones.len();
        if index < count {
            info!("Button: starting zone {} for {}s", index, BUTTON_RUN_SECS);
            executor.zone_on(index, BUTTON_RUN_SECS);
        } else {
            debug!("Button: walked past the last zone, nothing started");
        }
    }
}
