use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tour::{Tour, TourPricing};

/// A dated (and optionally timed) instance of a tour with its own seat inventory.
///
/// `capacity_remaining` stays within `0..=capacity_max`; every mutation goes
/// through `take_seats` / `release_seats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Departure {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub tour_name: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub capacity_max: u32,
    pub capacity_remaining: u32,
    pub pricing: TourPricing,
}

impl Departure {
    pub fn new(tour: &Tour, date: NaiveDate, time: Option<NaiveTime>, capacity_max: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tour_id: tour.id,
            tour_name: tour.name.clone(),
            date,
            time,
            capacity_max,
            capacity_remaining: capacity_max,
            pricing: tour.pricing,
        }
    }

    pub fn has_capacity(&self, persons: u32) -> bool {
        self.capacity_remaining >= persons
    }

    /// Remove seats from sale.
    pub fn take_seats(&mut self, persons: u32) -> Result<(), InventoryError> {
        if !self.has_capacity(persons) {
            return Err(InventoryError::InsufficientCapacity {
                departure_id: self.id,
                requested: persons,
                available: self.capacity_remaining,
            });
        }
        self.capacity_remaining -= persons;
        Ok(())
    }

    /// Put seats back on sale, never above `capacity_max`. Returns how many
    /// seats were actually returned.
    pub fn release_seats(&mut self, persons: u32) -> u32 {
        let room = self.capacity_max - self.capacity_remaining;
        let released = persons.min(room);
        self.capacity_remaining += released;
        released
    }

    /// A departure without a time is bookable for the whole day.
    pub fn has_started(&self, now: NaiveDateTime) -> bool {
        let today = now.date();
        if self.date != today {
            return self.date < today;
        }
        match self.time {
            Some(time) => time < now.time(),
            None => false,
        }
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity_max == 0 {
            0.0
        } else {
            1.0 - (f64::from(self.capacity_remaining) / f64::from(self.capacity_max))
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Insufficient capacity on departure {departure_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        departure_id: Uuid,
        requested: u32,
        available: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure(capacity: u32) -> Departure {
        let tour = Tour::new("Isla Bartolome", TourPricing::new(12000, 6000));
        let date = NaiveDate::from_ymd_opt(2030, 3, 14).unwrap();
        Departure::new(&tour, date, NaiveTime::from_hms_opt(9, 30, 0), capacity)
    }

    #[test]
    fn test_take_and_release_seats() {
        let mut dep = departure(10);

        dep.take_seats(3).unwrap();
        assert_eq!(dep.capacity_remaining, 7);
        assert!((dep.utilization() - 0.3).abs() < 0.01);

        let err = dep.take_seats(8).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientCapacity {
                departure_id: dep.id,
                requested: 8,
                available: 7
            }
        );
        assert_eq!(dep.capacity_remaining, 7);

        assert_eq!(dep.release_seats(3), 3);
        assert_eq!(dep.capacity_remaining, 10);
    }

    #[test]
    fn test_release_is_capped_at_max() {
        let mut dep = departure(4);
        dep.take_seats(1).unwrap();
        assert_eq!(dep.release_seats(5), 1);
        assert_eq!(dep.capacity_remaining, 4);
    }

    #[test]
    fn test_has_started() {
        let dep = departure(4);
        let same_day = |h, m| dep.date.and_hms_opt(h, m, 0).unwrap();

        assert!(!dep.has_started(same_day(8, 0)));
        assert!(dep.has_started(same_day(10, 0)));
        assert!(dep.has_started(dep.date.succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap()));
        assert!(!dep.has_started(dep.date.pred_opt().unwrap().and_hms_opt(23, 0, 0).unwrap()));

        let mut untimed = dep.clone();
        untimed.time = None;
        assert!(!untimed.has_started(same_day(23, 59)));
    }
}
