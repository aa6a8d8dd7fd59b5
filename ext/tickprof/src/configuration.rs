use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_DURATION: Duration = Duration::from_secs(3600);
pub const DEFAULT_FRAME_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_TRACES_TO_DUMP: usize = 500;
pub const DEFAULT_CODE_CACHE_CAPACITY: usize = 65536;
pub const DEFAULT_TIME_MODE: TimeMode = TimeMode::CpuTime;
pub const DEFAULT_SCHEDULER: SchedulerKind = SchedulerKind::Signal;

pub const MAX_CALLTRACES: usize = 32768;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub scheduler: SchedulerKind,
    pub time_mode: TimeMode,
    pub frame_buffer_size: usize,
    pub max_call_traces: usize,
    pub code_cache_capacity: usize,
    /// Parse function symbols of mapped native libraries on start.
    pub load_native_libraries: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            scheduler: DEFAULT_SCHEDULER,
            time_mode: DEFAULT_TIME_MODE,
            frame_buffer_size: DEFAULT_FRAME_BUFFER_SIZE,
            max_call_traces: MAX_CALLTRACES,
            code_cache_capacity: DEFAULT_CODE_CACHE_CAPACITY,
            load_native_libraries: true,
        }
    }
}

impl Configuration {
    /// Parses options like `{"scheduler": "timer_thread", "time_mode": "wall"}`.
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Interval timer signal; samples whichever thread the signal lands on.
    Signal,
    /// Helper thread sampling every thread the runtime reports.
    TimerThread,
    /// Ticks are delivered by the embedder.
    Manual,
}

impl FromStr for SchedulerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Self::Signal),
            "timer_thread" => Ok(Self::TimerThread),
            "manual" => Ok(Self::Manual),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeMode {
    #[serde(rename = "cpu")]
    CpuTime,
    #[serde(rename = "wall")]
    WallTime,
}

impl FromStr for TimeMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::CpuTime),
            "wall" => Ok(Self::WallTime),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!("cpu".parse(), Ok(TimeMode::CpuTime));
        assert_eq!("wall".parse(), Ok(TimeMode::WallTime));
        assert_eq!("real".parse::<TimeMode>(), Err(()));
        assert_eq!("timer_thread".parse(), Ok(SchedulerKind::TimerThread));
        assert_eq!("Signal".parse::<SchedulerKind>(), Err(()));
    }

    #[test]
    fn test_from_json() {
        let configuration =
            Configuration::from_json(r#"{"scheduler": "manual", "time_mode": "wall", "frame_buffer_size": 64}"#)
                .unwrap();
        assert_eq!(configuration.scheduler, SchedulerKind::Manual);
        assert_eq!(configuration.time_mode, TimeMode::WallTime);
        assert_eq!(configuration.frame_buffer_size, 64);
        assert_eq!(configuration.max_call_traces, MAX_CALLTRACES);
        assert!(configuration.load_native_libraries);

        assert_eq!(Configuration::from_json("{}").unwrap(), Configuration::default());
        assert!(Configuration::from_json(r#"{"scheduler": "perf"}"#).is_err());
    }
}
