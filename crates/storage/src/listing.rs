//! Directory listing parsers for backends without a structured listing API.
//!
//! FTP servers answer `MLSD` (machine readable) or `LIST` (whatever the server
//! feels like), and the SCP backend only has `ls`. The long-format parser
//! understands Unix `ls -l` (including `--full-time`) and DOS/IIS layouts.
//! When neither matches, [`parse_universal`] pairs `ls -l` with plain `ls`
//! output and infers the date layout from the shape of the date tokens.

use crate::consts::{
    DAY_REGEX, ISO_DATE_REGEX, ISO_OFFSET_REGEX, ISO_TIME_REGEX, MLSD_MODIFY_REGEX, MONTH_NAME_REGEX,
    NUMERIC_DATE_REGEX, SHORT_TIME_REGEX, TOTAL_LINE_REGEX, UNIX_MODE_REGEX, WINDOWS_DATE_REGEX, WINDOWS_TIME_REGEX,
    YEAR_REGEX,
};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// What kind of thing a listing line describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One parsed listing line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// Modification time in UTC
    pub modified: OffsetDateTime,
}

impl Entry {
    fn new(name: impl Into<String>, kind: EntryKind, modified: OffsetDateTime) -> Self {
        Self { name: name.into(), kind, modified }
    }
}

/// Non-empty lines of a listing with `\r` stripped and a leading `total N`
/// summary removed.
pub fn content_lines(output: &str) -> Vec<&str> {
    let mut lines: Vec<&str> =
        output.lines().map(|line| line.trim_end_matches('\r')).filter(|line| !line.trim().is_empty()).collect();
    if lines.first().is_some_and(|first| TOTAL_LINE_REGEX.is_match(first)) {
        lines.remove(0);
    }
    lines
}

/// Parse `ls -l` / FTP `LIST` output in Unix or DOS layout.
///
/// The layout is detected from the first line. Returns `None` when the
/// layout is unknown or any file/directory line fails to parse, so the
/// caller can fall back to [`parse_universal`]. `.` and `..` are dropped and
/// so are device, pipe and socket entries.
pub fn parse_long_listing(output: &str, now: OffsetDateTime) -> Option<Vec<Entry>> {
    let lines = content_lines(output);
    let Some(first) = lines.first() else {
        return Some(Vec::new());
    };
    let unix = UNIX_MODE_REGEX.is_match(first);
    let windows = !unix && first.split_whitespace().next().is_some_and(|token| WINDOWS_DATE_REGEX.is_match(token));
    if !unix && !windows {
        return None;
    }

    let mut entries = Vec::with_capacity(lines.len());
    for line in lines {
        if unix && matches!(line.chars().next(), Some('b' | 'c' | 'p' | 's')) {
            continue;
        }
        let entry = match unix {
            true => parse_unix_line(line, now)?,
            false => parse_windows_line(line)?,
        };
        if entry.name != "." && entry.name != ".." {
            entries.push(entry);
        }
    }
    Some(entries)
}

/// Split off `count` whitespace-separated fields, returning them with the
/// remainder of the line (only the single separating space is removed, so
/// names keep any inner or trailing whitespace).
fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line;
    for _ in 0..count {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let rest = rest.strip_prefix(|c: char| c.is_whitespace()).unwrap_or(rest);
    Some((fields, rest))
}

/// `drwxr-xr-x 2 owner group 4096 Mar  9 10:11 name`
///
/// Also accepts the ISO dates printed by `ls --full-time`/`--time-style=long-iso`.
pub fn parse_unix_line(line: &str, now: OffsetDateTime) -> Option<Entry> {
    let kind = match line.chars().next()? {
        'd' => EntryKind::Directory,
        '-' | 'l' => EntryKind::File,
        _ => return None,
    };
    let (_, rest) = split_fields(line, 5)?;

    let (modified, name) = if rest.split_whitespace().next().is_some_and(|token| ISO_DATE_REGEX.is_match(token)) {
        parse_iso_fields(rest)?
    } else {
        let (fields, name) = split_fields(rest, 3)?;
        let month = parse_month(fields[0])?;
        let day: u8 = fields[1].parse().ok()?;
        let modified = match SHORT_TIME_REGEX.captures(fields[2]) {
            Some(time) => {
                let time = Time::from_hms(time[1].parse().ok()?, time[2].parse().ok()?, 0).ok()?;
                recent_date(month, day, time, now)?
            },
            None => {
                let year: i32 = fields[2].parse().ok()?;
                PrimitiveDateTime::new(Date::from_calendar_date(year, month, day).ok()?, Time::MIDNIGHT).assume_utc()
            },
        };
        (modified, name)
    };

    let name = match kind {
        // Symlinks are listed as `name -> target`.
        EntryKind::File if line.starts_with('l') => name.split(" -> ").next().unwrap_or(name),
        _ => name,
    };
    (!name.is_empty()).then(|| Entry::new(name, kind, modified))
}

fn parse_iso_fields(rest: &str) -> Option<(OffsetDateTime, &str)> {
    let (fields, remainder) = split_fields(rest, 2)?;
    let date = ISO_DATE_REGEX.captures(fields[0])?;
    let date = Date::from_calendar_date(
        date[1].parse().ok()?,
        Month::try_from(date[2].parse::<u8>().ok()?).ok()?,
        date[3].parse().ok()?,
    )
    .ok()?;
    let time = ISO_TIME_REGEX.captures(fields[1])?;
    let seconds = time.get(3).map_or(Some(0), |s| s.as_str().parse().ok())?;
    let nanos = time.get(4).map_or(Some(0), |f| parse_fraction(f.as_str()))?;
    let time = Time::from_hms_nano(time[1].parse().ok()?, time[2].parse().ok()?, seconds, nanos).ok()?;

    let (offset, name) = match remainder.split_whitespace().next() {
        Some(token) if ISO_OFFSET_REGEX.is_match(token) => {
            let (_, name) = split_fields(remainder, 1)?;
            (parse_offset(token)?, name)
        },
        _ => (UtcOffset::UTC, remainder),
    };
    Some((PrimitiveDateTime::new(date, time).assume_offset(offset).to_offset(UtcOffset::UTC), name))
}

/// `+0200` style offsets.
fn parse_offset(token: &str) -> Option<UtcOffset> {
    let sign: i8 = if token.starts_with('-') { -1 } else { 1 };
    let hours: i8 = token[1..3].parse().ok()?;
    let minutes: i8 = token[3..5].parse().ok()?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

/// Fractional seconds digits to nanoseconds.
fn parse_fraction(digits: &str) -> Option<u32> {
    let value: u32 = digits.parse().ok()?;
    Some(value * 10u32.pow(9 - digits.len() as u32))
}

/// `ls` omits the year for recent files: assume the current year unless
/// that puts the date more than a day into the future.
fn recent_date(month: Month, day: u8, time: Time, now: OffsetDateTime) -> Option<OffsetDateTime> {
    let this_year = PrimitiveDateTime::new(Date::from_calendar_date(now.year(), month, day).ok()?, time).assume_utc();
    if this_year > now + Duration::DAY {
        let last_year = Date::from_calendar_date(now.year() - 1, month, day).ok()?;
        return Some(PrimitiveDateTime::new(last_year, time).assume_utc());
    }
    Some(this_year)
}

fn parse_month(token: &str) -> Option<Month> {
    let month = match token.to_ascii_lowercase().as_str() {
        "jan" => Month::January,
        "feb" => Month::February,
        "mar" => Month::March,
        "apr" => Month::April,
        "may" => Month::May,
        "jun" => Month::June,
        "jul" => Month::July,
        "aug" => Month::August,
        "sep" => Month::September,
        "oct" => Month::October,
        "nov" => Month::November,
        "dec" => Month::December,
        _ => return None,
    };
    Some(month)
}

/// `03-09-24  10:11AM       <DIR>          name` (IIS / DOS layout)
pub fn parse_windows_line(line: &str) -> Option<Entry> {
    let (fields, name) = split_fields(line, 3)?;
    let name = name.trim_start();
    let date: Vec<&str> = fields[0].split('-').collect();
    if date.len() != 3 || !WINDOWS_DATE_REGEX.is_match(fields[0]) {
        return None;
    }
    let year: i32 = match date[2].parse().ok()? {
        short @ 0..70 => 2000 + short,
        short @ 70..100 => 1900 + short,
        full => full,
    };
    let date = Date::from_calendar_date(year, Month::try_from(date[0].parse::<u8>().ok()?).ok()?, date[1].parse().ok()?)
        .ok()?;

    let time = WINDOWS_TIME_REGEX.captures(fields[1])?;
    let mut hour: u8 = time[1].parse().ok()?;
    match time.get(3).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(meridiem) if meridiem == "PM" && hour < 12 => hour += 12,
        Some(meridiem) if meridiem == "AM" && hour == 12 => hour = 0,
        _ => {},
    }
    let time = Time::from_hms(hour, time[2].parse().ok()?, 0).ok()?;

    let kind = match fields[2].eq_ignore_ascii_case("<DIR>") {
        true => EntryKind::Directory,
        false => {
            fields[2].replace(',', "").parse::<u64>().ok()?;
            EntryKind::File
        },
    };
    (!name.is_empty()).then(|| Entry::new(name, kind, PrimitiveDateTime::new(date, time).assume_utc()))
}

/// Parse `MLSD` output (`type=file;size=12;modify=20240309101112; name`).
///
/// `cdir`/`pdir` facts and lines without a `type` are skipped; a missing
/// `modify` fact yields the Unix epoch.
pub fn parse_mlsd(output: &str) -> Vec<Entry> {
    content_lines(output).into_iter().filter_map(parse_mlsd_line).collect()
}

fn parse_mlsd_line(line: &str) -> Option<Entry> {
    let (facts, name) = line.split_once(' ')?;
    let mut kind = None;
    let mut modified = OffsetDateTime::UNIX_EPOCH;
    for fact in facts.split(';').filter(|fact| !fact.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => Some(EntryKind::File),
                    "dir" => Some(EntryKind::Directory),
                    _ => None,
                }
            },
            "modify" => modified = parse_mlsd_time(value).unwrap_or(modified),
            _ => {},
        }
    }
    Some(Entry::new(name, kind?, modified))
}

fn parse_mlsd_time(value: &str) -> Option<OffsetDateTime> {
    let parts = MLSD_MODIFY_REGEX.captures(value)?;
    let date = Date::from_calendar_date(
        parts[1].parse().ok()?,
        Month::try_from(parts[2].parse::<u8>().ok()?).ok()?,
        parts[3].parse().ok()?,
    )
    .ok()?;
    let nanos = parts.get(7).map_or(Some(0), |f| parse_fraction(f.as_str()))?;
    let time = Time::from_hms_nano(parts[4].parse().ok()?, parts[5].parse().ok()?, parts[6].parse().ok()?, nanos).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Order of the day/month/year groups in a numeric date token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateOrder {
    DayMonthYear,
    MonthDayYear,
    YearMonthDay,
    YearDayMonth,
}

/// Shape of one date/time token in an unknown listing layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenShape {
    /// `d/M/yyyy`-like group; `year_first` when the first group has 4 digits
    Numeric { year_first: bool },
    /// `HH:mm`
    Time,
    /// `yyyy`
    Year,
    /// `d` / `dd`
    Day,
    /// `MMM`
    MonthName,
}

fn token_shape(token: &str) -> Option<TokenShape> {
    if let Some(groups) = NUMERIC_DATE_REGEX.captures(token)
        && groups[2] == groups[4]
    {
        return Some(TokenShape::Numeric { year_first: groups[1].len() == 4 });
    }
    if SHORT_TIME_REGEX.is_match(token) {
        return Some(TokenShape::Time);
    }
    if YEAR_REGEX.is_match(token) {
        return Some(TokenShape::Year);
    }
    if DAY_REGEX.is_match(token) {
        return Some(TokenShape::Day);
    }
    if MONTH_NAME_REGEX.is_match(token) {
        return Some(TokenShape::MonthName);
    }
    None
}

/// The date layout inferred for a whole listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InferredFormat {
    /// Resolved order of numeric date tokens, if the listing had any.
    pub order: Option<DateOrder>,
    /// No numeric date in the listing disambiguated day from month (every
    /// leading group was `<= 12`), so the day-first default was used.
    pub ambiguous: bool,
}

impl InferredFormat {
    /// Resolve the numeric date order across every date token in a listing.
    ///
    /// A group greater than 12 must be a day: if the middle group is ever
    /// greater than 12 the layout is month-first (day-first within year-first
    /// layouts' tail), if the leading group is, day-first. Otherwise the
    /// day-first default stands and, unless the year comes first, the
    /// result is flagged ambiguous.
    fn infer<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut year_first = None;
        let mut leading_over_12 = false;
        let mut middle_over_12 = false;
        for token in tokens {
            let Some(groups) = NUMERIC_DATE_REGEX.captures(token) else {
                continue;
            };
            // Year-first tokens are read back to front.
            let reverse = groups[1].len() == 4;
            let leading = if reverse { &groups[5] } else { &groups[1] };
            year_first.get_or_insert(reverse);
            leading_over_12 |= leading.parse::<u32>().is_ok_and(|n| n > 12);
            middle_over_12 |= groups[3].parse::<u32>().is_ok_and(|n| n > 12);
        }
        let Some(year_first) = year_first else {
            return Self::default();
        };
        let month_first = middle_over_12 && !leading_over_12;
        let order = match (year_first, month_first) {
            (false, false) => DateOrder::DayMonthYear,
            (false, true) => DateOrder::MonthDayYear,
            (true, false) => DateOrder::YearMonthDay,
            (true, true) => DateOrder::YearDayMonth,
        };
        let ambiguous = !year_first && !leading_over_12 && !middle_over_12;
        Self { order: Some(order), ambiguous }
    }

    fn parse(&self, tokens: &[&str], now: OffsetDateTime) -> Option<OffsetDateTime> {
        let (mut year, mut month, mut day, mut time) = (None, None, None, None);
        for token in tokens {
            match token_shape(token)? {
                TokenShape::Numeric { .. } => {
                    let groups = NUMERIC_DATE_REGEX.captures(token)?;
                    let numbers: [i32; 3] =
                        [groups[1].parse().ok()?, groups[3].parse().ok()?, groups[5].parse().ok()?];
                    let (d, m, y) = match self.order? {
                        DateOrder::DayMonthYear => (numbers[0], numbers[1], numbers[2]),
                        DateOrder::MonthDayYear => (numbers[1], numbers[0], numbers[2]),
                        DateOrder::YearMonthDay => (numbers[2], numbers[1], numbers[0]),
                        DateOrder::YearDayMonth => (numbers[1], numbers[2], numbers[0]),
                    };
                    day = Some(u8::try_from(d).ok()?);
                    month = Some(Month::try_from(u8::try_from(m).ok()?).ok()?);
                    year = Some(y);
                },
                TokenShape::Time => {
                    let parts = SHORT_TIME_REGEX.captures(token)?;
                    time = Some(Time::from_hms(parts[1].parse().ok()?, parts[2].parse().ok()?, 0).ok()?);
                },
                TokenShape::Year => year = Some(token.parse().ok()?),
                TokenShape::Day => day = Some(token.parse().ok()?),
                TokenShape::MonthName => month = Some(parse_month(token)?),
            }
        }
        let (month, day, time) = (month?, day?, time.unwrap_or(Time::MIDNIGHT));
        match year {
            Some(year) => {
                Some(PrimitiveDateTime::new(Date::from_calendar_date(year, month, day).ok()?, time).assume_utc())
            },
            None => recent_date(month, day, time, now),
        }
    }
}

/// Parse an unknown `ls -l` layout with the help of plain `ls` output.
///
/// Lines are paired by index; the short name is cut from the end of the long
/// line, the mode/links/owner/group/size columns are skipped and the (at
/// most three) remaining tokens form the date. Returns `None` when the two
/// listings don't pair up or any date fails to parse with the inferred
/// layout.
pub fn parse_universal(long: &str, short: &str, now: OffsetDateTime) -> Option<(Vec<Entry>, InferredFormat)> {
    let long_lines = content_lines(long);
    let short_lines = content_lines(short);
    if long_lines.len() != short_lines.len() {
        return None;
    }

    let mut rows = Vec::with_capacity(long_lines.len());
    for (long, name) in long_lines.into_iter().zip(short_lines) {
        let cut = match long.strip_suffix(name) {
            Some(head) => head,
            None => &long[..long.rfind(name)?],
        };
        let kind = match cut.starts_with('d') {
            true => EntryKind::Directory,
            false => EntryKind::File,
        };
        let tokens: Vec<&str> = cut.get(10..)?.split_whitespace().skip(4).take(3).collect();
        rows.push((name, kind, tokens));
    }

    let format = InferredFormat::infer(rows.iter().flat_map(|(_, _, tokens)| tokens.iter().copied()));
    let mut entries = Vec::with_capacity(rows.len());
    for (name, kind, tokens) in rows {
        if name == "." || name == ".." {
            continue;
        }
        entries.push(Entry::new(name, kind, format.parse(&tokens, now)?));
    }
    Some((entries, format))
}
