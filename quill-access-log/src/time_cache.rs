//! Second-granularity cache for the `%t` timestamp.
//!
//! The formatted `[dd/Mon/yyyy:HH:mm:ss ±hhmm]` text is recomputed only when
//! the requested instant is more than 1000ms past the instant it was last
//! computed for. Readers load the published stamp lock-free; a refresh takes
//! the mutex, re-checks, then publishes the `(millis, text)` pair as one unit.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Datelike, Local, Offset, TimeZone, Timelike, Utc};
use std::fmt::Write;
use std::sync::{Arc, Mutex};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Refresh when the new instant is more than this far past the cached one.
pub const REFRESH_WINDOW_MILLIS: i64 = 1000;

/// A formatted timestamp and the instant it was computed for.
#[derive(Debug)]
pub struct Stamp {
    millis: i64,
    text: String,
}

impl Stamp {
    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Time-zone rendering state, fixed when the cache is built.
#[derive(Debug, Clone)]
struct ZoneFormat<Tz: TimeZone> {
    tz: Tz,
    standard_secs: i32,
    standard: String,
    daylight: String,
}

impl<Tz: TimeZone> ZoneFormat<Tz> {
    fn new(tz: Tz) -> Self {
        let year = Utc::now().year();
        let jan = offset_secs_at(&tz, year, 1);
        let jul = offset_secs_at(&tz, year, 7);
        // Northern or southern hemisphere, the larger offset is the DST one.
        let standard_secs = jan.min(jul);
        let daylight_secs = jan.max(jul);
        Self {
            tz,
            standard_secs,
            standard: format_offset(standard_secs),
            daylight: format_offset(daylight_secs),
        }
    }

    fn in_daylight_time(&self, instant: &DateTime<Utc>) -> bool {
        let offset = self.tz.offset_from_utc_datetime(&instant.naive_utc());
        offset.fix().local_minus_utc() != self.standard_secs
    }

    fn render(&self, millis: i64) -> String {
        let instant = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
        let local = instant.with_timezone(&self.tz);
        let zone = if self.in_daylight_time(&instant) {
            &self.daylight
        } else {
            &self.standard
        };

        let mut out = String::with_capacity(32);
        let _ = write!(
            out,
            "[{:02}/{}/{:04}:{:02}:{:02}:{:02} {}]",
            local.day(),
            MONTHS[local.month0() as usize],
            local.year(),
            local.hour(),
            local.minute(),
            local.second(),
            zone,
        );
        out
    }
}

fn offset_secs_at<Tz: TimeZone>(tz: &Tz, year: i32, month: u32) -> i32 {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .map(|utc| tz.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc())
        .unwrap_or(0)
}

/// Render a UTC offset in seconds as `+hhmm` / `-hhmm`.
pub fn format_offset(offset_secs: i32) -> String {
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    let hours = abs / 3600;
    let minutes = abs / 60 % 60;
    format!("{sign}{hours:02}{minutes:02}")
}

/// Shared timestamp cache; one per evaluator.
pub struct TimeCache<Tz: TimeZone = Local> {
    zone: ZoneFormat<Tz>,
    current: ArcSwapOption<Stamp>,
    refresh: Mutex<()>,
}

impl TimeCache<Local> {
    /// Cache rendering in the process's default time zone.
    pub fn local() -> Self {
        Self::new(Local)
    }
}

impl Default for TimeCache<Local> {
    fn default() -> Self {
        Self::local()
    }
}

impl<Tz: TimeZone> TimeCache<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self {
            zone: ZoneFormat::new(tz),
            current: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    /// Timestamp text for `now_millis`, reusing the cached text inside the window.
    pub fn current_timestamp(&self, now_millis: i64) -> Arc<Stamp> {
        if let Some(stamp) = self.fresh(now_millis) {
            return stamp;
        }

        let _guard = self.refresh.lock().unwrap_or_else(|p| p.into_inner());
        // Another thread may have refreshed while we waited.
        if let Some(stamp) = self.fresh(now_millis) {
            return stamp;
        }

        let stamp = Arc::new(Stamp {
            millis: now_millis,
            text: self.zone.render(now_millis),
        });
        self.current.store(Some(Arc::clone(&stamp)));
        stamp
    }

    fn fresh(&self, now_millis: i64) -> Option<Arc<Stamp>> {
        self.current
            .load_full()
            .filter(|s| now_millis.saturating_sub(s.millis) <= REFRESH_WINDOW_MILLIS)
    }

    /// Offset strings precomputed for standard and daylight time.
    pub fn zone_offsets(&self) -> (&str, &str) {
        (&self.zone.standard, &self.zone.daylight)
    }
}
