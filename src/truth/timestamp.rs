//! 时间戳解析 (Wall-clock helpers)
//!
//! 真值记录只给出时分秒, 日期需要从显式字段、视频URL或视频文件名中提取。

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static DIGITS_14: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{14})").expect("valid regex"));
static DIGITS_8: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{8})").expect("valid regex"));

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// 从文件名中提取录制开始时间
///
/// 去掉扩展名后按 `_` 切分, 从后往前取第一个14位数字段 (`YYYYMMDDHHMMSS`)。
pub fn datetime_from_filename(path: &Path) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('_')
        .find(|p| p.len() == 14 && p.chars().all(|c| c.is_ascii_digit()))
        .and_then(|p| NaiveDateTime::parse_from_str(p, STAMP_FORMAT).ok())
}

/// 从任意文本 (URL) 中提取日期: 优先14位时间戳, 其次8位日期
pub fn date_from_text(text: &str) -> Option<NaiveDate> {
    if let Some(m) = DIGITS_14.captures(text) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&m[1], STAMP_FORMAT) {
            return Some(dt.date());
        }
    }
    DIGITS_8
        .captures(text)
        .and_then(|m| NaiveDate::parse_from_str(&m[1], "%Y%m%d").ok())
}

/// 显式日期字段: `YYYY-MM-DD`, `DD/MM/YYYY` 或数字时间戳
pub fn parse_explicit_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
        .or_else(|| date_from_text(text))
}

pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S").ok()
}

/// 完整的日期时间 (含日期时不再需要推断)
pub fn parse_full_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// 组合日期与时分秒; 结束早于开始时结束时间顺延一天 (只处理一次跨日)
pub fn combine_with_rollover(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> (NaiveDateTime, NaiveDateTime) {
    let start_dt = date.and_time(start);
    let mut end_dt = date.and_time(end);
    if end_dt < start_dt {
        end_dt += Duration::days(1);
    }
    (start_dt, end_dt)
}

/// 两个时刻之间的秒数 (毫秒精度)
pub fn seconds_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_datetime_from_filename() {
        let got = datetime_from_filename(Path::new("/videos/cam1_bar_20240101100000.mp4"));
        assert_eq!(got, Some(dt("2024-01-01 10:00:00")));

        // 最后一个14位段优先
        let got = datetime_from_filename(Path::new("20230101000000_x_20240101100000"));
        assert_eq!(got, Some(dt("2024-01-01 10:00:00")));

        assert_eq!(datetime_from_filename(Path::new("cam1_2024.mp4")), None);
        assert_eq!(datetime_from_filename(Path::new("cam1_20241301100000.mp4")), None);
    }

    #[test]
    fn test_date_from_text() {
        assert_eq!(
            date_from_text("https://cdn/x/rec_20240315083000_cam.mp4"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            date_from_text("https://cdn/2024-03-15/day20240316"),
            NaiveDate::from_ymd_opt(2024, 3, 16)
        );
        assert_eq!(date_from_text("no digits here"), None);
    }

    #[test]
    fn test_parse_explicit_date() {
        assert_eq!(parse_explicit_date("2024-01-02"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_explicit_date("02/01/2024"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_explicit_date("20240102"), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(parse_explicit_date("yesterday"), None);
    }

    #[test]
    fn test_rollover_adds_exactly_one_day() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (s, e) = combine_with_rollover(
            date,
            parse_time_of_day("23:59:50").unwrap(),
            parse_time_of_day("00:00:05").unwrap(),
        );
        assert_eq!(s, dt("2024-01-01 23:59:50"));
        assert_eq!(e, dt("2024-01-02 00:00:05"));
        assert_eq!(seconds_between(s, e), 15.0);
    }

    #[test]
    fn test_no_rollover_for_ordered_times() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (s, e) = combine_with_rollover(
            date,
            parse_time_of_day("10:00:10").unwrap(),
            parse_time_of_day(" 10:00:12 ").unwrap(),
        );
        assert_eq!(e - s, Duration::seconds(2));
    }
}
