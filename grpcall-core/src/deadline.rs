use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Absolute deadline value meaning "no deadline".
pub const NO_DEADLINE: u64 = 0;

/// A call deadline, relative to when the call options are materialized or absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    After(Duration),
    At(SystemTime),
}

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self::After(timeout)
    }

    #[must_use]
    pub fn at(when: SystemTime) -> Self {
        Self::At(when)
    }

    /// Epoch milliseconds. Never returns [`NO_DEADLINE`]; a zero timeout is "now".
    #[must_use]
    pub fn to_epoch_ms(&self) -> u64 {
        let ms = match self {
            Self::After(timeout) => now_ms().saturating_add(duration_ms(*timeout)),
            Self::At(when) => system_time_ms(*when),
        };
        ms.max(1)
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        Self::After(timeout)
    }
}

impl From<SystemTime> for Deadline {
    fn from(when: SystemTime) -> Self {
        Self::At(when)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn system_time_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, duration_ms)
}

#[must_use]
pub fn now_ms() -> u64 {
    system_time_ms(SystemTime::now())
}

/// Absolute epoch-ms deadline; `None` maps to [`NO_DEADLINE`].
#[must_use]
pub fn to_absolute_deadline(deadline: Option<&Deadline>) -> u64 {
    deadline.map_or(NO_DEADLINE, Deadline::to_epoch_ms)
}

#[must_use]
pub fn create_deadline(timeout: Duration) -> u64 {
    Deadline::After(timeout).to_epoch_ms()
}

/// Time left before `deadline_ms`. `None` means no deadline; an expired deadline yields zero.
#[must_use]
pub fn remaining_time(deadline_ms: u64) -> Option<Duration> {
    if deadline_ms == NO_DEADLINE {
        return None;
    }
    Some(Duration::from_millis(deadline_ms.saturating_sub(now_ms())))
}

#[must_use]
pub fn is_deadline_expired(deadline_ms: u64) -> bool {
    deadline_ms != NO_DEADLINE && now_ms() >= deadline_ms
}

/// Human-readable rendering such as `in 5s`, `1m 3s ago` or `no deadline`.
#[must_use]
pub fn format_deadline(deadline_ms: u64) -> String {
    format_deadline_from(deadline_ms, now_ms())
}

fn format_deadline_from(deadline_ms: u64, now: u64) -> String {
    if deadline_ms == NO_DEADLINE {
        return "no deadline".to_string();
    }

    let future = deadline_ms >= now;
    let abs = deadline_ms.abs_diff(now);
    let seconds = abs / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    let text = if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    };

    if future {
        format!("in {text}")
    } else {
        format!("{text} ago")
    }
}
