use std::fmt;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn next(self) -> Season {
        match self {
            Season::Spring => Season::Summer,
            Season::Summer => Season::Fall,
            Season::Fall => Season::Winter,
            Season::Winter => Season::Spring,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
            Season::Winter => "Winter",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game clock; one tick is one week.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCalendar {
    /// Ticks processed since the game started.
    pub tick: u64,
    /// Week within the season, starting at 1.
    pub week: u32,
    pub season: Season,
    pub year: u32,
    weeks_per_season: u32,
}

impl Default for GameCalendar {
    fn default() -> Self {
        Self::new(12)
    }
}

impl GameCalendar {
    pub fn new(weeks_per_season: u32) -> Self {
        Self {
            tick: 0,
            week: 1,
            season: Season::Spring,
            year: 1,
            weeks_per_season: weeks_per_season.max(1),
        }
    }

    pub fn weeks_per_season(&self) -> u32 {
        self.weeks_per_season
    }

    /// Move to the next week. Returns `true` when a new season began.
    pub fn advance(&mut self) -> bool {
        self.tick += 1;
        if self.week < self.weeks_per_season {
            self.week += 1;
            return false;
        }
        self.week = 1;
        self.season = self.season.next();
        if self.season == Season::Spring {
            self.year += 1;
        }
        true
    }
}

impl fmt::Display for GameCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Week {}, {}, Year {}", self.week, self.season, self.year)
    }
}
