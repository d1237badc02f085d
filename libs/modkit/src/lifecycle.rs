use std::sync::atomic::{AtomicU8, Ordering};

// ----- State model -----------------------------------------------------------

/// Lifecycle state of an [`App`](crate::App). Moves strictly forward:
/// `Created → Configuring → Initializing → Serving → Closing → Terminated`.
/// Fatal errors may jump from any state straight to `Closing` or `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppState {
    Created,
    Configuring,
    Initializing,
    Serving,
    Closing,
    Terminated,
}

impl AppState {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        match self {
            AppState::Created => 0,
            AppState::Configuring => 1,
            AppState::Initializing => 2,
            AppState::Serving => 3,
            AppState::Closing => 4,
            AppState::Terminated => 5,
        }
    }

    #[inline]
    pub const fn from_u8(x: u8) -> Self {
        match x {
            1 => AppState::Configuring,
            2 => AppState::Initializing,
            3 => AppState::Serving,
            4 => AppState::Closing,
            5 => AppState::Terminated,
            _ => AppState::Created,
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppState::Created => "created",
            AppState::Configuring => "configuring",
            AppState::Initializing => "initializing",
            AppState::Serving => "serving",
            AppState::Closing => "closing",
            AppState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Atomic cell holding an [`AppState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(AppState::Created.as_u8()))
    }

    #[inline]
    pub(crate) fn load(&self) -> AppState {
        AppState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `next`; never goes backwards.
    pub(crate) fn advance(&self, next: AppState) {
        let prev = self.0.fetch_max(next.as_u8(), Ordering::AcqRel);
        if prev < next.as_u8() {
            tracing::debug!(from = %AppState::from_u8(prev), to = %next, "app state changed");
        }
    }

    /// `Created → Configuring`, exactly once.
    pub(crate) fn try_start(&self) -> bool {
        self.0
            .compare_exchange(
                AppState::Created.as_u8(),
                AppState::Configuring.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_moves_forward() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), AppState::Created);
        assert!(cell.try_start());
        assert!(!cell.try_start());
        cell.advance(AppState::Serving);
        cell.advance(AppState::Initializing);
        assert_eq!(cell.load(), AppState::Serving);
        cell.advance(AppState::Terminated);
        assert_eq!(cell.load(), AppState::Terminated);
    }

    #[test]
    fn u8_round_trip_covers_every_state() {
        for s in [
            AppState::Created,
            AppState::Configuring,
            AppState::Initializing,
            AppState::Serving,
            AppState::Closing,
            AppState::Terminated,
        ] {
            assert_eq!(AppState::from_u8(s.as_u8()), s);
        }
    }
}
