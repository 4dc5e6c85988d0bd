//! Turning files on disk into entries.
//!
//! Plain text and Markdown are read as-is; `.docx` documents are unpacked and
//! reduced to their paragraph text. The entry date is guessed from the start
//! of the text, falling back to the file's modification time.
use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, Utc};
use globset::{GlobBuilder, GlobSet};
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::{now_millis, JournalError, Result};

/// Only this many leading characters are searched for a date.
pub const DATE_SCAN_CHARS: usize = 500;

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid ISO date pattern")
});

static MONTH_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .expect("valid month-first date pattern")
});

static DAY_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\.?,?\s+(\d{{4}})\b"
    ))
    .expect("valid day-first date pattern")
});

static US_NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("valid numeric date pattern")
});

static XML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid xml tag pattern"));

/// Where an imported entry's date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Found in the text
    Content,
    /// File modification time
    Modified,
    /// Neither was available
    ImportTime,
}

/// Text and metadata read from one file
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedText {
    /// File stem
    pub title: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub date_source: DateSource,
}

/// Reads the text of a supported file.
pub fn extract_text(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());

    match extension.as_deref() {
        None | Some("txt") | Some("md") | Some("markdown") | Some("text") => {
            fs::read_to_string(path).map_err(|e| JournalError::Import {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
        Some("docx") => extract_docx_text(path),
        Some(other) => Err(JournalError::Import {
            path: path.to_path_buf(),
            message: format!("unsupported file type .{}", other),
        }),
    }
}

fn extract_docx_text(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|e| JournalError::Import {
            path: path.to_path_buf(),
            message: format!("not a Word document: {}", e),
        })?;

    let mut xml = String::new();
    document.read_to_string(&mut xml)?;
    Ok(docx_xml_to_text(&xml))
}

fn docx_xml_to_text(xml: &str) -> String {
    let marked = xml
        .replace("</w:p>", "\n")
        .replace("<w:br/>", "\n")
        .replace("<w:tab/>", "\t");
    let stripped = XML_TAG.replace_all(&marked, "");

    decode_entities(&stripped)
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn number(caps: &Captures, group: usize) -> Option<u32> {
    caps.get(group)?.as_str().parse().ok()
}

/// Finds the first date written near the start of `text`.
///
/// Recognizes `2023-03-03`, `March 3, 2023`, `Mar 3rd 2023`, `3 March 2023`
/// and `03/03/2023` (month first). The date is taken as midnight UTC.
pub fn detect_date(text: &str) -> Option<DateTime<Utc>> {
    let head: String = text.chars().take(DATE_SCAN_CHARS).collect();

    type Extract = fn(&Captures) -> Option<(i32, u32, u32)>;
    let patterns: [(&Lazy<Regex>, Extract); 4] = [
        (&ISO_DATE, |c| Some((number(c, 1)? as i32, number(c, 2)?, number(c, 3)?))),
        (&MONTH_FIRST, |c| {
            Some((number(c, 3)? as i32, month_number(c.get(1)?.as_str())?, number(c, 2)?))
        }),
        (&DAY_FIRST, |c| {
            Some((number(c, 3)? as i32, month_number(c.get(2)?.as_str())?, number(c, 1)?))
        }),
        (&US_NUMERIC, |c| Some((number(c, 3)? as i32, number(c, 1)?, number(c, 2)?))),
    ];

    let mut earliest: Option<(usize, NaiveDate)> = None;
    for (pattern, extract) in patterns {
        for caps in pattern.captures_iter(&head) {
            let Some(whole) = caps.get(0) else { continue };
            if earliest.is_some_and(|(start, _)| start <= whole.start()) {
                break;
            }
            let date = extract(&caps).and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));
            match date {
                Some(date) => {
                    trace!("Date candidate {} at offset {}", date, whole.start());
                    earliest = Some((whole.start(), date));
                    break;
                }
                None => trace!("Skipping impossible date '{}'", whole.as_str()),
            }
        }
    }

    earliest
        .and_then(|(_, date)| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// Reads `path` and works out the entry's title and date.
pub fn import_file(path: &Path) -> Result<ImportedText> {
    let text = extract_text(path)?;
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "Imported entry".to_string());

    let (created_at, date_source) = match detect_date(&text) {
        Some(date) => (date, DateSource::Content),
        None => match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => (DateTime::<Utc>::from(modified), DateSource::Modified),
            Err(e) => {
                warn!("No date for {}: {}", path.display(), e);
                (now_millis(), DateSource::ImportTime)
            }
        },
    };
    debug!(
        "Imported {} dated {} ({:?})",
        path.display(),
        created_at,
        date_source
    );

    Ok(ImportedText {
        title,
        text,
        created_at,
        date_source,
    })
}

/// Files under `dir` to import, sorted by path.
///
/// `pattern` is a case-insensitive glob matched against the full path.
pub fn collect_import_paths(
    dir: &Path,
    recursive: bool,
    pattern: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let matcher = pattern
        .map(|p| {
            GlobBuilder::new(p)
                .case_insensitive(true)
                .build()
                .and_then(|glob| GlobSet::new(&[glob]))
                .map_err(|e| JournalError::Import {
                    path: dir.to_path_buf(),
                    message: format!("invalid pattern: {}", e),
                })
        })
        .transpose()?;

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error accessing path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| matcher.as_ref().map_or(true, |m| m.is_match(path)))
        .collect();

    paths.sort();
    Ok(paths)
}
