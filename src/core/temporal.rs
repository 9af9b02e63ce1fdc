use chrono::Datelike;

use super::date_key::DateKey;
use super::task::Task;

/// Widest radius a range accepts: a year either side of the center.
pub const MAX_RADIUS: u32 = 366;

/// The days currently on screen: a center date with `radius` days either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub center: DateKey,
    pub radius: u32,
}

impl VisibleRange {
    pub fn new(center: DateKey, radius: u32) -> Self {
        Self { center, radius: radius.min(MAX_RADIUS) }
    }

    pub fn set_radius(&mut self, radius: u32) {
        if radius > MAX_RADIUS {
            log::warn!("Clamping visible range radius {} to {}", radius, MAX_RADIUS);
        }
        self.radius = radius.min(MAX_RADIUS);
    }

    pub fn dates(&self) -> Vec<DateKey> {
        let r = self.radius as i64;
        (-r..=r).map(|offset| self.center.add_days(offset)).collect()
    }

    pub fn previous(&mut self) {
        self.center = self.center.pred();
    }

    pub fn next(&mut self) {
        self.center = self.center.succ();
    }

    pub fn jump_to(&mut self, date: DateKey) {
        self.center = date;
    }

    pub fn contains(&self, date: DateKey) -> bool {
        let r = self.radius as i64;
        date >= self.center.add_days(-r) && date <= self.center.add_days(r)
    }
}

/// Inclusive week bounds around `date`.
pub fn week_bounds(date: DateKey, starts_on_monday: bool) -> (DateKey, DateKey) {
    let weekday = date.date().weekday();
    let offset = if starts_on_monday {
        weekday.num_days_from_monday()
    } else {
        weekday.num_days_from_sunday()
    } as i64;
    let start = date.add_days(-offset);
    (start, start.add_days(6))
}

pub fn tasks_for_date(tasks: &[Task], date: DateKey) -> Vec<Task> {
    tasks.iter().filter(|t| t.date == date).cloned().collect()
}

pub fn tasks_for_week(tasks: &[Task], date: DateKey, starts_on_monday: bool) -> Vec<Task> {
    let (start, end) = week_bounds(date, starts_on_monday);
    tasks
        .iter()
        .filter(|t| t.date >= start && t.date <= end)
        .cloned()
        .collect()
}

/// Total estimated minutes of unfinished work.
pub fn remaining_minutes(tasks: &[Task]) -> u32 {
    tasks
        .iter()
        .filter(|t| !t.completed)
        .map(|t| t.estimated_minutes)
        .sum()
}
