use crate::domain::timer::TimerEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Feeds `TimerEvent::Tick` into `sender` once per `period` until the receiver
/// is dropped. Missed ticks are skipped rather than burst-delivered.
pub fn spawn_ticker(period: Duration, sender: mpsc::Sender<TimerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if sender.send(TimerEvent::Tick).await.is_err() {
                tracing::debug!("timer receiver dropped; stopping ticker");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::timer::{TimerPhase, TimerState};

    #[tokio::test(start_paused = true)]
    async fn ticker_drives_a_full_focus_session() {
        let (sender, mut receiver) = mpsc::channel(8);
        let handle = spawn_ticker(TICK_PERIOD, sender);

        let mut state = TimerState::new(15, 5).expect("valid lengths");
        state.apply(TimerEvent::Start).expect("start");
        for _ in 0..15 * 60 {
            let event = receiver.recv().await.expect("tick");
            state.apply(event).expect("apply tick");
        }

        assert_eq!(state.phase, TimerPhase::Break);
        assert_eq!(state.completed_sessions, 1);

        drop(receiver);
        handle.await.expect("ticker stops once receiver is gone");
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let (sender, mut receiver) = mpsc::channel(1);
        let started = Instant::now();
        let _handle = spawn_ticker(TICK_PERIOD, sender);

        assert_eq!(receiver.recv().await, Some(TimerEvent::Tick));
        assert!(started.elapsed() >= TICK_PERIOD);
    }
}
