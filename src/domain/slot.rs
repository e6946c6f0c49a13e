use time::{Date, Duration, Month, OffsetDateTime, Time};

/// Minimum notice required before a booking's start time for the requester
/// to still be allowed to cancel it.
pub const CANCEL_LEAD_TIME: Duration = Duration::hours(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Pt,
    En,
}

impl Locale {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "pt" | "pt-BR" | "pt_BR" => Some(Self::Pt),
            "en" | "en-US" | "en_US" => Some(Self::En),
            _ => None,
        }
    }
}

/// Floor an instant to the start of its hour. Slots are hour-granular, so
/// every `scheduled_at` that reaches storage has gone through this.
pub fn truncate_to_hour(instant: OffsetDateTime) -> OffsetDateTime {
    let time = instant.time();
    let excess = Duration::minutes(time.minute() as i64)
        + Duration::seconds(time.second() as i64)
        + Duration::nanoseconds(time.nanosecond() as i64);
    instant - excess
}

/// Last instant at which a booking for `scheduled_at` may still be canceled.
/// Cancellation is allowed strictly before this instant.
pub fn cancellation_deadline(scheduled_at: OffsetDateTime) -> OffsetDateTime {
    scheduled_at - CANCEL_LEAD_TIME
}

/// Inclusive `[start, end]` window covering a calendar day in UTC.
pub fn day_bounds(date: Date) -> (OffsetDateTime, OffsetDateTime) {
    let start = date.midnight().assume_utc();
    let end = date.with_time(Time::MAX).assume_utc();
    (start, end)
}

/// Human phrase for a slot, e.g. pt: "dia 12 de março às 14:00h".
pub fn format_for_display(instant: OffsetDateTime, locale: Locale) -> String {
    let month = month_name(instant.month(), locale);
    match locale {
        Locale::Pt => format!(
            "dia {:02} de {} às {}:{:02}h",
            instant.day(),
            month,
            instant.hour(),
            instant.minute()
        ),
        Locale::En => format!(
            "{} {} at {}:{:02}",
            month,
            instant.day(),
            instant.hour(),
            instant.minute()
        ),
    }
}

fn month_name(month: Month, locale: Locale) -> &'static str {
    match locale {
        Locale::Pt => match month {
            Month::January => "janeiro",
            Month::February => "fevereiro",
            Month::March => "março",
            Month::April => "abril",
            Month::May => "maio",
            Month::June => "junho",
            Month::July => "julho",
            Month::August => "agosto",
            Month::September => "setembro",
            Month::October => "outubro",
            Month::November => "novembro",
            Month::December => "dezembro",
        },
        Locale::En => match month {
            Month::January => "January",
            Month::February => "February",
            Month::March => "March",
            Month::April => "April",
            Month::May => "May",
            Month::June => "June",
            Month::July => "July",
            Month::August => "August",
            Month::September => "September",
            Month::October => "October",
            Month::November => "November",
            Month::December => "December",
        },
    }
}
