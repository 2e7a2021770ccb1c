// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use tracing::{error, info};
use crate::metadata::GameMetadata;

/// Operator-facing status output
pub trait StatusDisplay: Send {
    fn progress(&mut self, current: u32, total: i32);

    fn game_info(&mut self, metadata: &GameMetadata);

    fn fault(&mut self, message: &str);
}

/// Whole percent complete, or `None` while the total is unknown
pub fn progress_percent(current: u32, total: i32) -> Option<i64> {
    if total == 0 {
        return None;
    }
    Some(i64::from(current) * 100 / i64::from(total))
}

/// Renders status as log events
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn progress(&mut self, current: u32, total: i32) {
        if let Some(percent) = progress_percent(current, total) {
            info!("{}/{} frames ({}%)", current, total, percent);
        }
    }

    fn game_info(&mut self, metadata: &GameMetadata) {
        info!(name = %metadata.display_name(), author = %metadata.display_author(), year = metadata.year, "receiving game");
    }

    fn fault(&mut self, message: &str) {
        error!("{}", message);
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DisplayEvent {
        Progress(u32, i32),
        GameInfo(GameMetadata),
        Fault(String),
    }

    pub struct MockDisplay {
        pub log: Arc<Mutex<Vec<DisplayEvent>>>,
    }

    impl MockDisplay {
        pub fn new() -> (Self, Arc<Mutex<Vec<DisplayEvent>>>) {
            let log = Arc::new(Mutex::new(Vec::new()));
            (MockDisplay { log: Arc::clone(&log) }, log)
        }
    }

    impl StatusDisplay for MockDisplay {
        fn progress(&mut self, current: u32, total: i32) {
            self.log.lock().unwrap().push(DisplayEvent::Progress(current, total));
        }

        fn game_info(&mut self, metadata: &GameMetadata) {
            self.log.lock().unwrap().push(DisplayEvent::GameInfo(metadata.clone()));
        }

        fn fault(&mut self, message: &str) {
            self.log.lock().unwrap().push(DisplayEvent::Fault(message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), None);
        assert_eq!(progress_percent(5, 0), None);
        assert_eq!(progress_percent(0, 10), Some(0));
        assert_eq!(progress_percent(1, 3), Some(33));
        assert_eq!(progress_percent(3, 3), Some(100));
        assert_eq!(progress_percent(4, 3), Some(133));
    }
}
