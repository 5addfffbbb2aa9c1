//! Line-oriented command channel to the vibration/LED device.
//!
//! Two links exist: a serial port, or a simulation that only logs. One is
//! picked at startup. All writers share one [`Actuator`], which serialises
//! commands and spaces them out so the device's input buffer never overruns.

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::config::ActuatorConfig;
use crate::error::ActuatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Vibrate { millis: u32 },
    LedColor { r: u8, g: u8, b: u8 },
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorCommand::Vibrate { millis } => write!(f, "vibrate:{}", millis),
            ActuatorCommand::LedColor { r, g, b } => write!(f, "led_color:{},{},{}", r, g, b),
        }
    }
}

pub trait ActuatorLink: Send {
    fn write_line(&mut self, line: &str) -> Result<(), ActuatorError>;

    /// True when a physical device is on the other end.
    fn is_attached(&self) -> bool;
}

pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ActuatorError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|source| ActuatorError::Open {
                port: path.to_string(),
                source,
            })?;
        Ok(Self { port })
    }
}

impl ActuatorLink for SerialLink {
    fn write_line(&mut self, line: &str) -> Result<(), ActuatorError> {
        self.port
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| self.port.flush())
            .map_err(|source| ActuatorError::Write {
                command: line.to_string(),
                source,
            })
    }

    fn is_attached(&self) -> bool {
        true
    }
}

pub struct SimulatedLink;

impl ActuatorLink for SimulatedLink {
    fn write_line(&mut self, line: &str) -> Result<(), ActuatorError> {
        log::info!("[simulation] actuator: {}", line);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        false
    }
}

pub struct Actuator {
    link: Mutex<Box<dyn ActuatorLink>>,
    spacing: Duration,
    attached: bool,
}

impl Actuator {
    pub fn new(link: Box<dyn ActuatorLink>, spacing: Duration) -> Self {
        let attached = link.is_attached();
        Self {
            link: Mutex::new(link),
            spacing,
            attached,
        }
    }

    pub fn simulated() -> Self {
        Self::new(Box::new(SimulatedLink), Duration::ZERO)
    }

    /// Open the configured serial port, falling back to simulation.
    pub fn open(config: &ActuatorConfig) -> Self {
        if !config.enabled {
            log::info!("Actuator disabled, running in simulation mode");
            return Self::simulated();
        }
        match SerialLink::open(&config.port, config.baud_rate) {
            Ok(link) => {
                log::info!("Actuator connected on {} ({} baud)", config.port, config.baud_rate);
                Self::new(Box::new(link), Duration::from_millis(config.command_spacing_ms))
            }
            Err(e) => {
                log::warn!("Actuator not detected: {}", e);
                Self::simulated()
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Write one command. Holds the link for the write plus the spacing delay.
    pub fn send(&self, command: &ActuatorCommand) -> Result<(), ActuatorError> {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.write_line(&command.to_string())?;
        if !self.spacing.is_zero() {
            std::thread::sleep(self.spacing);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Link that records every line it is given.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingLink {
        pub lines: Arc<Mutex<Vec<String>>>,
        pub attempts: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl RecordingLink {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        pub(crate) fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl ActuatorLink for RecordingLink {
        fn write_line(&mut self, line: &str) -> Result<(), ActuatorError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ActuatorError::Write {
                    command: line.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"),
                });
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn is_attached(&self) -> bool {
            true
        }
    }

    #[test]
    fn command_wire_format() {
        assert_eq!(ActuatorCommand::Vibrate { millis: 200 }.to_string(), "vibrate:200");
        assert_eq!(
            ActuatorCommand::LedColor { r: 100, g: 200, b: 255 }.to_string(),
            "led_color:100,200,255"
        );
    }

    #[test]
    fn simulation_always_succeeds() {
        let actuator = Actuator::simulated();
        assert!(!actuator.is_attached());
        assert!(actuator.send(&ActuatorCommand::Vibrate { millis: 200 }).is_ok());
    }

    #[test]
    fn disabled_config_selects_simulation() {
        let config = ActuatorConfig {
            enabled: false,
            ..ActuatorConfig::default()
        };
        assert!(!Actuator::open(&config).is_attached());
    }

    #[test]
    fn missing_port_falls_back_to_simulation() {
        let config = ActuatorConfig {
            port: "/dev/does-not-exist-melotsa".into(),
            ..ActuatorConfig::default()
        };
        assert!(!Actuator::open(&config).is_attached());
    }

    #[test]
    fn enforces_spacing_between_commands() {
        let link = RecordingLink::default();
        let actuator = Actuator::new(Box::new(link.clone()), Duration::from_millis(30));
        let start = Instant::now();
        for _ in 0..3 {
            actuator.send(&ActuatorCommand::LedColor { r: 1, g: 2, b: 3 }).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(link.lines().len(), 3);
    }

    #[test]
    fn concurrent_writers_do_not_interleave() {
        let link = RecordingLink::default();
        let actuator = Arc::new(Actuator::new(Box::new(link.clone()), Duration::ZERO));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let actuator = Arc::clone(&actuator);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        actuator.send(&ActuatorCommand::Vibrate { millis: i }).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let lines = link.lines();
        assert_eq!(lines.len(), 100);
        assert!(lines.iter().all(|l| l.starts_with("vibrate:")));
    }

    #[test]
    fn write_failures_surface_as_errors() {
        let link = RecordingLink::failing();
        let actuator = Actuator::new(Box::new(link.clone()), Duration::ZERO);
        assert!(matches!(
            actuator.send(&ActuatorCommand::Vibrate { millis: 1 }),
            Err(ActuatorError::Write { .. })
        ));
        assert_eq!(link.attempts(), 1);
    }
}
