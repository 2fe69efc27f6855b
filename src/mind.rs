//! Proactive prompting
//!
//! The mind nudges the conversation without user input: a greeting when the
//! assistant boots, an optional follow-up after input re-enables, and
//! occasional small talk. Every prompt flows through the normal submit
//! path and is dropped on conflict.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use tracing::{debug, info};

pub const BOOT_PROMPT: &str = "You have just been booted up, greet your user, and do nothing else.";
pub const CONTINUE_PROMPT: &str = "Send the next message.";
pub const SMALL_TALK_PROMPT: &str = "Engage in small talk with the user.";

/// Worker tick; bounds how late a scheduled prompt can fire.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct MindConfig {
    /// Submit a greeting prompt when the assistant starts.
    pub boot_greeting: bool,

    /// Keep the conversation going after the assistant finishes speaking.
    pub continuous_responses: bool,

    /// Delay before a continuous-response prompt fires.
    pub continuous_response_delay: Duration,

    /// Chance of small talk per interval elapsed.
    pub small_talk_probability: f64,

    /// How often the small-talk gate is rolled.
    pub small_talk_interval: Duration,
}

impl Default for MindConfig {
    fn default() -> Self {
        Self {
            boot_greeting: true,
            continuous_responses: false,
            continuous_response_delay: Duration::from_secs(30),
            small_talk_probability: 0.2,
            small_talk_interval: Duration::from_secs(3600),
        }
    }
}

/// Signals the orchestrator feeds into the mind.
#[derive(Clone, Debug)]
pub enum MindSignal {
    InputEnabled,
    InputDisabled,
    Shutdown,
}

/// Handle for feeding signals to a running mind worker.
#[derive(Clone)]
pub struct MindHandle {
    signal_tx: Sender<MindSignal>,
}

impl MindHandle {
    pub fn notify(&self, signal: MindSignal) {
        let _ = self.signal_tx.send(signal);
    }
}

/// The assistant's sense of initiative.
pub struct AssistantMind {
    config: MindConfig,
    signal_tx: Sender<MindSignal>,
    signal_rx: Receiver<MindSignal>,
}

impl AssistantMind {
    pub fn new(config: MindConfig) -> Self {
        let (signal_tx, signal_rx) = bounded(16);
        Self {
            config,
            signal_tx,
            signal_rx,
        }
    }

    pub fn config(&self) -> &MindConfig {
        &self.config
    }

    pub fn handle(&self) -> MindHandle {
        MindHandle {
            signal_tx: self.signal_tx.clone(),
        }
    }

    /// The prompt to submit at startup, if greeting is enabled.
    pub fn boot_prompt(&self) -> Option<&'static str> {
        self.config.boot_greeting.then_some(BOOT_PROMPT)
    }

    /// Start the worker; prompts are sent to `prompt_tx` as they fire.
    pub fn start_worker(self, prompt_tx: Sender<String>) -> JoinHandle<()> {
        let config = self.config;
        let signal_rx = self.signal_rx;

        thread::spawn(move || {
            info!("Assistant mind worker starting");

            let mut pending_continue: Option<Instant> = None;
            let mut next_small_talk = Instant::now() + config.small_talk_interval;

            loop {
                match signal_rx.recv_timeout(TICK_INTERVAL) {
                    Ok(MindSignal::InputEnabled) => {
                        if config.continuous_responses {
                            pending_continue =
                                Some(Instant::now() + config.continuous_response_delay);
                            debug!(
                                "Continuous response armed for {:?} from now",
                                config.continuous_response_delay
                            );
                        }
                    }
                    Ok(MindSignal::InputDisabled) => {
                        // The user (or the assistant itself) got there first.
                        pending_continue = None;
                    }
                    Ok(MindSignal::Shutdown) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                let now = Instant::now();

                if pending_continue.is_some_and(|due| now >= due) {
                    pending_continue = None;
                    if prompt_tx.send(CONTINUE_PROMPT.to_string()).is_err() {
                        break;
                    }
                }

                if now >= next_small_talk {
                    next_small_talk = now + config.small_talk_interval;
                    if rand::thread_rng().gen_bool(config.small_talk_probability) {
                        debug!("Small-talk gate passed");
                        if prompt_tx.send(SMALL_TALK_PROMPT.to_string()).is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Assistant mind worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_prompt_follows_config() {
        let with = AssistantMind::new(MindConfig::default());
        assert_eq!(with.boot_prompt(), Some(BOOT_PROMPT));

        let without = AssistantMind::new(MindConfig {
            boot_greeting: false,
            ..Default::default()
        });
        assert!(without.boot_prompt().is_none());
    }

    #[test]
    fn test_continuous_response_fires_after_delay() {
        let mind = AssistantMind::new(MindConfig {
            boot_greeting: false,
            continuous_responses: true,
            continuous_response_delay: Duration::from_millis(50),
            small_talk_probability: 0.0,
            small_talk_interval: Duration::from_secs(3600),
        });
        let handle = mind.handle();
        let (prompt_tx, prompt_rx) = bounded(4);
        let worker = mind.start_worker(prompt_tx);

        handle.notify(MindSignal::InputEnabled);
        let prompt = prompt_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(prompt, CONTINUE_PROMPT);

        handle.notify(MindSignal::Shutdown);
        worker.join().unwrap();
    }

    #[test]
    fn test_input_disabled_disarms_pending_prompt() {
        let mind = AssistantMind::new(MindConfig {
            boot_greeting: false,
            continuous_responses: true,
            continuous_response_delay: Duration::from_secs(3600),
            small_talk_probability: 0.0,
            small_talk_interval: Duration::from_secs(3600),
        });
        let handle = mind.handle();
        let (prompt_tx, prompt_rx) = bounded(4);
        let worker = mind.start_worker(prompt_tx);

        handle.notify(MindSignal::InputEnabled);
        handle.notify(MindSignal::InputDisabled);
        assert!(prompt_rx.recv_timeout(Duration::from_millis(400)).is_err());

        handle.notify(MindSignal::Shutdown);
        worker.join().unwrap();
    }

    #[test]
    fn test_disabled_continuous_responses_never_fire() {
        let mind = AssistantMind::new(MindConfig {
            boot_greeting: false,
            continuous_responses: false,
            continuous_response_delay: Duration::from_millis(10),
            small_talk_probability: 0.0,
            small_talk_interval: Duration::from_secs(3600),
        });
        let handle = mind.handle();
        let (prompt_tx, prompt_rx) = bounded(4);
        let worker = mind.start_worker(prompt_tx);

        handle.notify(MindSignal::InputEnabled);
        assert!(prompt_rx.recv_timeout(Duration::from_millis(300)).is_err());

        handle.notify(MindSignal::Shutdown);
        worker.join().unwrap();
    }
}
