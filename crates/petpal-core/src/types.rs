use crate::{
    Result,
    constants::WIRE_TERMINATOR,
    error::Error,
};
use chrono::Timelike;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Action the appliance can perform.
///
/// The set is closed on the wire side: the firmware only recognizes the
/// tokens returned by [`MotorCommand::wire_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotorCommand {
    Food,
    Water,
    Waste,
}

impl MotorCommand {
    /// Every command, in the order the schedule evaluator visits them.
    pub const ALL: [MotorCommand; 3] = [MotorCommand::Food, MotorCommand::Water, MotorCommand::Waste];

    /// ASCII token understood by the peripheral (without terminator).
    #[must_use]
    pub fn wire_token(self) -> &'static str {
        match self {
            MotorCommand::Food => "FOOD",
            MotorCommand::Water => "WATER",
            MotorCommand::Waste => "WASTE",
        }
    }

    /// Complete newline-terminated frame for this command.
    #[must_use]
    pub fn wire_frame(self) -> Vec<u8> {
        let token = self.wire_token().as_bytes();
        let mut frame = Vec::with_capacity(token.len() + 1);
        frame.extend_from_slice(token);
        frame.push(WIRE_TERMINATOR);
        frame
    }

    /// Lower-case name used for ledger keys and log fields.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            MotorCommand::Food => "food",
            MotorCommand::Water => "water",
            MotorCommand::Waste => "waste",
        }
    }

    /// Map a pushed request payload to a command.
    ///
    /// Surrounding whitespace is ignored and matching is ASCII
    /// case-insensitive. `POTTY` is accepted as the legacy name of
    /// [`MotorCommand::Waste`].
    ///
    /// # Errors
    /// Returns `Error::UnknownCommand` for anything outside the enumeration.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let token = payload.trim();
        [
            ("FOOD", MotorCommand::Food),
            ("WATER", MotorCommand::Water),
            ("WASTE", MotorCommand::Waste),
            ("POTTY", MotorCommand::Waste),
        ]
        .into_iter()
        .find(|(name, _)| token.eq_ignore_ascii_case(name))
        .map(|(_, command)| command)
        .ok_or_else(|| Error::UnknownCommand(payload.to_string()))
    }
}

impl fmt::Display for MotorCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.wire_token())
    }
}

impl std::str::FromStr for MotorCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MotorCommand::from_payload(s)
    }
}

/// Half of the 12-hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Meridiem {
    Am,
    Pm,
}

impl fmt::Display for Meridiem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Meridiem::Am => write!(f, "AM"),
            Meridiem::Pm => write!(f, "PM"),
        }
    }
}

/// Minute-resolution time of day on the 12-hour clock.
///
/// The canonical text form is `HH:MM:AM` / `HH:MM:PM` with zero-padded hour
/// and minute; midnight is `12:00:AM` and noon is `12:00:PM`. Schedule
/// entries and the current wall-clock time are both reduced to this key
/// before comparison.
///
/// # Examples
///
/// ```
/// use petpal_core::TimeKey;
///
/// let key = TimeKey::from_hm(23, 5).unwrap();
/// assert_eq!(key.to_string(), "11:05:PM");
/// assert_eq!(TimeKey::parse("11:05 pm").unwrap(), key);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeKey {
    hour12: u8,
    minute: u8,
    meridiem: Meridiem,
}

impl TimeKey {
    /// Build a key from 12-hour clock parts.
    ///
    /// # Errors
    /// Returns `Error::InvalidTimeOfDay` if the hour is not 1-12 or the
    /// minute is not 0-59.
    pub fn new(hour12: u8, minute: u8, meridiem: Meridiem) -> Result<Self> {
        if !(1..=12).contains(&hour12) || minute > 59 {
            return Err(Error::InvalidTimeOfDay(format!(
                "{hour12:02}:{minute:02}:{meridiem}"
            )));
        }
        Ok(TimeKey {
            hour12,
            minute,
            meridiem,
        })
    }

    /// Build a key from a 24-hour clock reading.
    ///
    /// # Errors
    /// Returns `Error::InvalidTimeOfDay` if the hour is above 23 or the
    /// minute above 59.
    pub fn from_hm(hour24: u32, minute: u32) -> Result<Self> {
        if hour24 > 23 || minute > 59 {
            return Err(Error::InvalidTimeOfDay(format!("{hour24:02}:{minute:02}")));
        }
        let meridiem = if hour24 < 12 { Meridiem::Am } else { Meridiem::Pm };
        let hour12 = match hour24 % 12 {
            0 => 12,
            h => h,
        };
        Ok(TimeKey {
            hour12: hour12 as u8,
            minute: minute as u8,
            meridiem,
        })
    }

    /// Reduce any clock reading to its key. Seconds are discarded.
    pub fn from_time<T: Timelike>(time: &T) -> Self {
        let meridiem = if time.hour() < 12 { Meridiem::Am } else { Meridiem::Pm };
        let hour12 = match time.hour() % 12 {
            0 => 12,
            h => h,
        };
        TimeKey {
            hour12: hour12 as u8,
            minute: time.minute() as u8,
            meridiem,
        }
    }

    /// Parse a schedule entry.
    ///
    /// Accepts the canonical `HH:MM:AM` form as well as an unpadded hour,
    /// a space instead of the last colon, and a lower-case suffix.
    ///
    /// # Errors
    /// Returns `Error::InvalidTimeOfDay` when the text is not a 12-hour
    /// time of day.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimeOfDay(text.to_string());
        let trimmed = text.trim();
        if trimmed.len() < 2 || !trimmed.is_char_boundary(trimmed.len() - 2) {
            return Err(invalid());
        }

        let (clock, suffix) = trimmed.split_at(trimmed.len() - 2);
        let meridiem = if suffix.eq_ignore_ascii_case("AM") {
            Meridiem::Am
        } else if suffix.eq_ignore_ascii_case("PM") {
            Meridiem::Pm
        } else {
            return Err(invalid());
        };

        let clock = clock.trim_end().trim_end_matches(':');
        let (hour, minute) = clock.split_once(':').ok_or_else(invalid)?;
        let valid_digits =
            |s: &str| (1..=2).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit());
        if !valid_digits(hour) || minute.len() != 2 || !valid_digits(minute) {
            return Err(invalid());
        }

        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        TimeKey::new(hour, minute, meridiem).map_err(|_| invalid())
    }

    /// Hour on the 12-hour clock (1-12).
    #[must_use]
    pub fn hour12(&self) -> u8 {
        self.hour12
    }

    #[must_use]
    pub fn minute(&self) -> u8 {
        self.minute
    }

    #[must_use]
    pub fn meridiem(&self) -> Meridiem {
        self.meridiem
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}:{:02}:{}", self.hour12, self.minute, self.meridiem)
    }
}

impl std::str::FromStr for TimeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TimeKey::parse(s)
    }
}

/// Schedule record as stored remotely.
///
/// Maps each motor to the times of day it should run. The record is fetched
/// fresh on every evaluation and never cached.
///
/// The store may deliver a list either as a JSON array or, once entries have
/// been deleted from the middle, as an object keyed by index; both shapes
/// are accepted. The legacy `pottyRefillTimes` list is merged into the waste
/// list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub food_refill_times: Vec<String>,
    pub water_refill_times: Vec<String>,
    pub waste_refill_times: Vec<String>,
}

impl ScheduleRecord {
    /// Raw entries configured for a command.
    #[must_use]
    pub fn times_for(&self, command: MotorCommand) -> &[String] {
        match command {
            MotorCommand::Food => &self.food_refill_times,
            MotorCommand::Water => &self.water_refill_times,
            MotorCommand::Waste => &self.waste_refill_times,
        }
    }

    /// `true` when no command has any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        MotorCommand::ALL
            .iter()
            .all(|command| self.times_for(*command).is_empty())
    }

    /// Whether `key` matches any parseable entry for `command`.
    #[must_use]
    pub fn contains(&self, command: MotorCommand, key: TimeKey) -> bool {
        self.times_for(command)
            .iter()
            .filter_map(|entry| TimeKey::parse(entry).ok())
            .any(|entry| entry == key)
    }

    /// Entries that do not parse as a time of day.
    #[must_use]
    pub fn invalid_entries(&self) -> Vec<(MotorCommand, &str)> {
        MotorCommand::ALL
            .iter()
            .flat_map(|command| {
                self.times_for(*command)
                    .iter()
                    .filter(|entry| TimeKey::parse(entry).is_err())
                    .map(move |entry| (*command, entry.as_str()))
            })
            .collect()
    }
}

/// Flatten one schedule field into its entries.
///
/// Strings are kept as they are, nulls are dropped and any other element is
/// kept as its JSON text so it surfaces through
/// [`ScheduleRecord::invalid_entries`] instead of failing the whole record.
/// A lone string counts as a one-entry list.
fn times_from_value(value: Value) -> Vec<String> {
    fn entry(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }

    match value {
        Value::Array(entries) => entries.into_iter().filter_map(entry).collect(),
        Value::Object(entries) => {
            let mut indexed: Vec<(u64, String)> = Vec::new();
            let mut unindexed = Vec::new();
            for (index, value) in entries {
                let Some(text) = entry(value) else { continue };
                match index.parse() {
                    Ok(index) => indexed.push((index, text)),
                    Err(_) => unindexed.push(text),
                }
            }
            indexed.sort_by_key(|(index, _)| *index);
            indexed
                .into_iter()
                .map(|(_, entry)| entry)
                .chain(unindexed)
                .collect()
        }
        other => entry(other).into_iter().collect(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScheduleRecord {
    #[serde(default)]
    food_refill_times: Value,
    #[serde(default)]
    water_refill_times: Value,
    #[serde(default)]
    waste_refill_times: Value,
    #[serde(default)]
    potty_refill_times: Value,
}

impl<'de> Deserialize<'de> for ScheduleRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawScheduleRecord::deserialize(deserializer)?;
        let mut waste = times_from_value(raw.waste_refill_times);
        for entry in times_from_value(raw.potty_refill_times) {
            if !waste.contains(&entry) {
                waste.push(entry);
            }
        }

        Ok(ScheduleRecord {
            food_refill_times: times_from_value(raw.food_refill_times),
            water_refill_times: times_from_value(raw.water_refill_times),
            waste_refill_times: waste,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, "12:00:AM")]
    #[case(12, 30, "12:30:PM")]
    #[case(23, 5, "11:05:PM")]
    #[case(1, 0, "01:00:AM")]
    #[case(11, 59, "11:59:AM")]
    #[case(13, 0, "01:00:PM")]
    fn test_time_key_canonical_format(
        #[case] hour: u32,
        #[case] minute: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(TimeKey::from_hm(hour, minute).unwrap().to_string(), expected);

        let time = NaiveTime::from_hms_opt(hour, minute, 42).unwrap();
        assert_eq!(TimeKey::from_time(&time).to_string(), expected);
    }

    #[rstest]
    #[case(24, 0)]
    #[case(0, 60)]
    fn test_time_key_rejects_out_of_range(#[case] hour: u32, #[case] minute: u32) {
        assert!(TimeKey::from_hm(hour, minute).is_err());
    }

    #[rstest]
    #[case("08:05:AM", "08:05:AM")]
    #[case("8:05:AM", "08:05:AM")]
    #[case("8:05 am", "08:05:AM")]
    #[case("  12:00:pm ", "12:00:PM")]
    #[case("12:00AM", "12:00:AM")]
    fn test_time_key_parse_lenient(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(TimeKey::parse(input).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("AM")]
    #[case("13:00:PM")]
    #[case("00:30:AM")]
    #[case("08:5:AM")]
    #[case("08:60:AM")]
    #[case("08:05")]
    #[case("08:05:XM")]
    #[case("ab:cd:AM")]
    #[case("08:05:ÀM")]
    fn test_time_key_parse_rejects(#[case] input: &str) {
        assert!(TimeKey::parse(input).is_err());
    }

    #[rstest]
    #[case("FOOD", MotorCommand::Food)]
    #[case("water", MotorCommand::Water)]
    #[case(" WASTE\n", MotorCommand::Waste)]
    #[case("POTTY", MotorCommand::Waste)]
    fn test_command_from_payload(#[case] payload: &str, #[case] expected: MotorCommand) {
        assert_eq!(MotorCommand::from_payload(payload).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("TREAT")]
    #[case("FOOD WATER")]
    fn test_command_from_payload_unknown(#[case] payload: &str) {
        assert!(matches!(
            MotorCommand::from_payload(payload),
            Err(Error::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_wire_frames() {
        assert_eq!(MotorCommand::Food.wire_frame(), b"FOOD\n");
        assert_eq!(MotorCommand::Water.wire_frame(), b"WATER\n");
        assert_eq!(MotorCommand::Waste.wire_frame(), b"WASTE\n");
    }

    #[test]
    fn test_schedule_record_from_arrays() {
        let json = r#"{
            "foodRefillTimes": ["08:00:AM", "06:30:PM"],
            "waterRefillTimes": ["09:00:AM"]
        }"#;
        let record: ScheduleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.times_for(MotorCommand::Food).len(), 2);
        assert!(record.times_for(MotorCommand::Waste).is_empty());
        assert!(record.contains(MotorCommand::Water, TimeKey::from_hm(9, 0).unwrap()));
        assert!(!record.contains(MotorCommand::Water, TimeKey::from_hm(21, 0).unwrap()));
    }

    #[test]
    fn test_schedule_record_from_sparse_object() {
        let json = r#"{ "foodRefillTimes": { "2": "07:00:PM", "0": "07:00:AM" } }"#;
        let record: ScheduleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.food_refill_times, vec!["07:00:AM", "07:00:PM"]);
    }

    #[test]
    fn test_schedule_record_merges_potty_times() {
        let json = r#"{
            "wasteRefillTimes": ["10:00:AM"],
            "pottyRefillTimes": ["10:00:AM", "10:00:PM"]
        }"#;
        let record: ScheduleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.waste_refill_times, vec!["10:00:AM", "10:00:PM"]);
    }

    #[test]
    fn test_schedule_record_null_entries_and_empty() {
        let record: ScheduleRecord =
            serde_json::from_str(r#"{ "waterRefillTimes": [null, "01:00:AM"] }"#).unwrap();
        assert_eq!(record.water_refill_times, vec!["01:00:AM"]);

        let empty: ScheduleRecord = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[rstest]
    #[case::number_in_list(r#"{"foodRefillTimes": ["08:00:AM", 5], "waterRefillTimes": ["09:00:AM"]}"#, &["08:00:AM", "5"])]
    #[case::lone_string(r#"{"foodRefillTimes": "08:00:AM", "waterRefillTimes": ["09:00:AM"]}"#, &["08:00:AM"])]
    #[case::scalar_field(r#"{"foodRefillTimes": true, "waterRefillTimes": ["09:00:AM"]}"#, &["true"])]
    #[case::nested_list(r#"{"foodRefillTimes": [["08:00:AM"]], "waterRefillTimes": ["09:00:AM"]}"#, &["[\"08:00:AM\"]"])]
    fn test_schedule_record_tolerates_malformed_field(
        #[case] json: &str,
        #[case] food: &[&str],
    ) {
        let record: ScheduleRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.food_refill_times, food);
        assert!(record.contains(MotorCommand::Water, TimeKey::from_hm(9, 0).unwrap()));
        assert!(
            record
                .invalid_entries()
                .iter()
                .all(|(command, _)| *command == MotorCommand::Food)
        );
    }

    #[test]
    fn test_schedule_record_invalid_entries() {
        let record = ScheduleRecord {
            food_refill_times: vec!["08:00:AM".into(), "breakfast".into()],
            ..Default::default()
        };

        assert_eq!(
            record.invalid_entries(),
            vec![(MotorCommand::Food, "breakfast")]
        );
        assert!(record.contains(MotorCommand::Food, TimeKey::from_hm(8, 0).unwrap()));
    }

    proptest! {
        #[test]
        fn prop_time_key_display_parses_back(hour in 0u32..24, minute in 0u32..60) {
            let key = TimeKey::from_hm(hour, minute).unwrap();
            prop_assert_eq!(TimeKey::parse(&key.to_string()).unwrap(), key);
        }

        #[test]
        fn prop_time_key_is_minute_resolution(hour in 0u32..24, minute in 0u32..60, a in 0u32..60, b in 0u32..60) {
            let first = NaiveTime::from_hms_opt(hour, minute, a).unwrap();
            let second = NaiveTime::from_hms_opt(hour, minute, b).unwrap();
            prop_assert_eq!(TimeKey::from_time(&first), TimeKey::from_time(&second));
        }
    }
}
