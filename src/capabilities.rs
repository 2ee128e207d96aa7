//! Formats, filters and character sets known to the installed converter.
//!
//! The tables are normally scraped from `gpsbabel -h` and `gpsbabel -l`, but
//! they are plain data and can be built by hand or loaded from JSON, which is
//! how the chain builder is tested without a converter installed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

const FILE_TYPES_HEADER: &str = "File Types (-i and -o options):";
const FILTERS_HEADER: &str = "Supported data filters:";
const FORMAT_OPTION_PREFIX: &str = "\t  ";
const FILTER_OPTION_PREFIX: &str = "\t ";

/// Validation oracle for the action chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Format name to its option names.
    #[serde(default)]
    pub formats: BTreeMap<String, Vec<String>>,
    /// Filter name to its option names.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    /// Primary charset name to its aliases.
    #[serde(default)]
    pub charsets: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the tables from the text printed by `-h` and `-l`.
    pub fn from_help_output(help: &str, charset_listing: &str) -> Self {
        let (formats, filters) = parse_help(help);
        Self {
            formats,
            filters,
            charsets: parse_charsets(charset_listing),
        }
    }

    pub fn with_format(mut self, name: &str, options: &[&str]) -> Self {
        self.formats.insert(name.to_string(), to_owned(options));
        self
    }

    pub fn with_filter(mut self, name: &str, options: &[&str]) -> Self {
        self.filters.insert(name.to_string(), to_owned(options));
        self
    }

    pub fn with_charset(mut self, name: &str, aliases: &[&str]) -> Self {
        self.charsets.insert(name.to_string(), to_owned(aliases));
        self
    }

    pub fn format_options(&self, name: &str) -> Option<&[String]> {
        self.formats.get(name).map(Vec::as_slice)
    }

    pub fn filter_options(&self, name: &str) -> Option<&[String]> {
        self.filters.get(name).map(Vec::as_slice)
    }

    /// Primary charset name for a primary name or one of its aliases.
    pub fn resolve_charset<'a>(&'a self, name: &str) -> Option<&'a str> {
        if let Some((primary, _)) = self.charsets.get_key_value(name) {
            return Some(primary.as_str());
        }
        self.charsets
            .iter()
            .find(|(_, aliases)| aliases.iter().any(|a| a == name))
            .map(|(primary, _)| primary.as_str())
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn first_word(line: &str) -> Option<&str> {
    line.split_whitespace().next()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HelpSection {
    General,
    FileTypes,
    Filters,
}

/// Scrape the format and filter tables from `gpsbabel -h`.
pub fn parse_help(help: &str) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, Vec<String>>) {
    let mut formats: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut section = HelpSection::General;
    let mut current: Option<String> = None;

    for line in help.lines() {
        let line = line.trim_end();
        match line.trim() {
            FILE_TYPES_HEADER => {
                section = HelpSection::FileTypes;
                current = None;
                continue;
            }
            FILTERS_HEADER => {
                section = HelpSection::Filters;
                current = None;
                continue;
            }
            "" => continue,
            _ => {}
        }

        let (table, option_prefix) = match section {
            HelpSection::General => continue,
            HelpSection::FileTypes => (&mut formats, FORMAT_OPTION_PREFIX),
            HelpSection::Filters => (&mut filters, FILTER_OPTION_PREFIX),
        };
        let Some(word) = first_word(line) else {
            continue;
        };
        if line.starts_with(option_prefix) {
            if let Some(options) = current.as_ref().and_then(|name| table.get_mut(name)) {
                options.push(word.to_string());
            }
        } else {
            table.entry(word.to_string()).or_default();
            current = Some(word.to_string());
        }
    }

    (formats, filters)
}

/// Scrape the charset table from `gpsbabel -l`.
///
/// Primary names sit on lines starting with `*`; aliases follow on
/// tab-indented, comma-separated lines.
pub fn parse_charsets(listing: &str) -> BTreeMap<String, Vec<String>> {
    let mut charsets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in listing.lines() {
        let line = line.trim_end();
        if line.starts_with('*') {
            let name = match line.find(' ') {
                Some(idx) => line[idx + 1..].trim(),
                None => line.trim_start_matches('*').trim(),
            };
            charsets.entry(name.to_string()).or_default();
            current = Some(name.to_string());
        } else if line.starts_with('\t') {
            if let Some(aliases) = current.as_ref().and_then(|name| charsets.get_mut(name)) {
                aliases.extend(
                    line.split(',')
                        .map(str::trim)
                        .filter(|alias| !alias.is_empty())
                        .map(str::to_string),
                );
            }
        }
    }

    charsets
}

/// Banner printed by `gpsbabel -V`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub banner: String,
    pub version: Option<String>,
}

/// Join the non-blank lines of the `-V` output into the banner.
pub fn parse_version(output: &str) -> VersionInfo {
    let banner: String = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let version = banner.split(' ').nth(2).map(str::to_string);
    VersionInfo { banner, version }
}

/// Guess a converter format from a file extension.
pub fn guess_format(path: impl AsRef<Path>) -> Option<&'static str> {
    let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "gpx" => Some("gpx"),
        "kml" => Some("kml"),
        "txt" => Some("nmea"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELP: &str = "GPSBabel Version 1.3.5.  http://www.gpsbabel.org\n\
\n\
Usage:\n\
    gpsbabel [options] -i INTYPE -f INFILE [filter] -o OUTTYPE -F OUTFILE\n\
\n\
File Types (-i and -o options):\n\
\tgarmin                   Garmin serial/USB protocol\n\
\t  snlen                    Length of generated shortnames\n\
\t  get_posn                 Return current position as a waypoint\n\
\tgpx                      GPX XML\n\
\t  snlen                    Length of generated shortnames\n\
\t  suppresswhite            No whitespace in generated shortnames\n\
\tkml                      Google Earth (Keyhole) Markup Language\n\
\n\
Supported data filters:\n\
\tsimplify                 Simplify routes\n\
\t count                     Maximum number of points in route\n\
\t error                     Maximum error\n\
\ttransform                Transform waypoints into a route, tracks into routes, ...\n\
\t wpt                       Transform track(s) or route(s) into waypoint(s) [R/T]\n";

    const CHARSETS: &str = "GPSBabel Version 1.3.5\n\
\n\
* ISO-8859-1\n\
\tLatin-1, l1, 819\n\
* UTF-8\n\
\tutf8,\n";

    #[test]
    fn test_parse_help_sections() {
        let (formats, filters) = parse_help(HELP);
        assert_eq!(formats.len(), 3);
        assert_eq!(formats["garmin"], ["snlen", "get_posn"]);
        assert_eq!(formats["gpx"], ["snlen", "suppresswhite"]);
        assert!(formats["kml"].is_empty());
        assert_eq!(filters["simplify"], ["count", "error"]);
        assert_eq!(filters["transform"], ["wpt"]);
        assert!(!formats.contains_key("Usage:"));
    }

    #[test]
    fn test_parse_charsets() {
        let charsets = parse_charsets(CHARSETS);
        assert_eq!(charsets["ISO-8859-1"], ["Latin-1", "l1", "819"]);
        assert_eq!(charsets["UTF-8"], ["utf8"]);
    }

    #[test]
    fn test_resolve_charset() {
        let caps = Capabilities::from_help_output(HELP, CHARSETS);
        assert_eq!(caps.resolve_charset("ISO-8859-1"), Some("ISO-8859-1"));
        assert_eq!(caps.resolve_charset("Latin-1"), Some("ISO-8859-1"));
        assert_eq!(caps.resolve_charset("latin-1"), None);
        assert_eq!(caps.resolve_charset("foobarbaz"), None);
    }

    #[test]
    fn test_parse_version() {
        let info = parse_version("\nGPSBabel Version 1.3.5\n\n");
        assert_eq!(info.banner, "GPSBabel Version 1.3.5");
        assert_eq!(info.version.as_deref(), Some("1.3.5"));
        assert_eq!(parse_version("oops").version, None);
    }

    #[test]
    fn test_guess_format() {
        assert_eq!(guess_format("track.GPX"), Some("gpx"));
        assert_eq!(guess_format("/tmp/places.kml"), Some("kml"));
        assert_eq!(guess_format("log.txt"), Some("nmea"));
        assert_eq!(guess_format("data.csv"), None);
        assert_eq!(guess_format("noext"), None);
    }

    #[test]
    fn test_json_tables() {
        let caps = Capabilities::from_json(r#"{"formats": {"gpx": ["snlen"]}}"#).unwrap();
        assert_eq!(caps.format_options("gpx").unwrap(), ["snlen"]);
        assert!(caps.filters.is_empty());
    }
}
