use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Time-slot response: meal period name to ordered slot times, in the
/// order the API sent them, e.g. `{"Lunch": ["12:00", "12:15"], "dinner": []}`.
pub type TimeSlotPeriods = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub time: String,
    pub available: bool,
}

/// Flatten per-period slot lists into one list of available slots.
///
/// Periods are visited in response order; an empty period contributes
/// nothing.
pub fn flatten_time_slots(periods: &TimeSlotPeriods) -> Vec<TimeSlot> {
    periods
        .values()
        .flatten()
        .map(|time| TimeSlot {
            time: time.clone(),
            available: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_skips_empty_periods() {
        let periods: TimeSlotPeriods =
            serde_json::from_str(r#"{"Lunch": ["12:00", "12:15"], "dinner": []}"#).unwrap();
        let slots = flatten_time_slots(&periods);
        assert_eq!(
            serde_json::to_value(&slots).unwrap(),
            json!([
                {"time": "12:00", "available": true},
                {"time": "12:15", "available": true}
            ])
        );
    }

    #[test]
    fn test_flatten_keeps_response_order() {
        let periods: TimeSlotPeriods =
            serde_json::from_str(r#"{"dinner": ["20:00"], "Lunch": ["13:00"]}"#).unwrap();
        let times: Vec<_> = flatten_time_slots(&periods)
            .into_iter()
            .map(|s| s.time)
            .collect();
        assert_eq!(times, vec!["20:00", "13:00"]);
    }

    #[test]
    fn test_flatten_empty() {
        assert!(flatten_time_slots(&TimeSlotPeriods::new()).is_empty());
    }
}
