use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

/// Option name to optional value; `None` renders as a bare flag.
///
/// A `BTreeMap` keeps the rendered option list sorted by key.
pub type ActionOptions = BTreeMap<String, Option<String>>;

/// Build [`ActionOptions`] from borrowed pairs.
pub fn action_options(pairs: &[(&str, Option<&str>)]) -> ActionOptions {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect()
}

/// The four directives gpsbabel understands in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Charset,
    InputFile,
    OutputFile,
    Filter,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charset => "charset",
            Self::InputFile => "infile",
            Self::OutputFile => "outfile",
            Self::Filter => "filter",
        }
    }

    pub fn is_file(self) -> bool {
        matches!(self, Self::InputFile | Self::OutputFile)
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "charset" => Ok(Self::Charset),
            "infile" => Ok(Self::InputFile),
            "outfile" => Ok(Self::OutputFile),
            "filter" => Ok(Self::Filter),
            _ => Err(Error::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated chain entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    kind: ActionKind,
    name: String,
    path: Option<String>,
    options: ActionOptions,
}

impl Action {
    /// Check a directive against the capability tables.
    pub fn validated(
        capabilities: &Capabilities,
        kind: ActionKind,
        name: &str,
        path: Option<&str>,
        options: ActionOptions,
    ) -> Result<Self> {
        if kind.is_file() && path.is_none() {
            return Err(Error::MissingFilename {
                action: kind.as_str(),
            });
        }

        match kind {
            ActionKind::InputFile | ActionKind::OutputFile => {
                let known = capabilities
                    .format_options(name)
                    .ok_or_else(|| Error::UnknownFormat(name.to_string()))?;
                check_options(name, known, &options)?;
            }
            ActionKind::Filter => {
                let known = capabilities
                    .filter_options(name)
                    .ok_or_else(|| Error::UnknownFilter(name.to_string()))?;
                check_options(name, known, &options)?;
            }
            ActionKind::Charset => {
                if capabilities.resolve_charset(name).is_none() {
                    return Err(Error::UnknownCharset(name.to_string()));
                }
            }
        }

        Ok(Self {
            kind,
            name: name.to_string(),
            path: path.map(str::to_string),
            options,
        })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Format, filter, or charset name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &ActionOptions {
        &self.options
    }

    /// `name` followed by `,key` / `,key=value` for each option.
    pub fn argument(&self) -> String {
        let mut arg = self.name.clone();
        for (key, value) in &self.options {
            arg.push(',');
            arg.push_str(key);
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                arg.push('=');
                arg.push_str(value);
            }
        }
        arg
    }
}

fn check_options(owner: &str, known: &[String], options: &ActionOptions) -> Result<()> {
    match options.keys().find(|key| !known.contains(*key)) {
        Some(key) => Err(Error::InvalidOption {
            owner: owner.to_string(),
            option: key.clone(),
        }),
        None => Ok(()),
    }
}

/// Ordered list of directives describing one conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionChain {
    actions: Vec<Action>,
}

impl ActionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append one action; on error the chain is unchanged.
    pub fn add_action(
        &mut self,
        capabilities: &Capabilities,
        kind: &str,
        name: &str,
        path: Option<&str>,
        options: ActionOptions,
    ) -> Result<()> {
        let kind = kind.parse::<ActionKind>()?;
        self.add(capabilities, kind, name, path, options)
    }

    pub fn add(
        &mut self,
        capabilities: &Capabilities,
        kind: ActionKind,
        name: &str,
        path: Option<&str>,
        options: ActionOptions,
    ) -> Result<()> {
        let action = Action::validated(capabilities, kind, name, path, options)?;
        debug!(kind = %action.kind, entry = %action.name, "appending action");
        self.actions.push(action);
        Ok(())
    }

    /// Append a charset directive followed by a file action, both or neither.
    pub fn add_file(
        &mut self,
        capabilities: &Capabilities,
        kind: ActionKind,
        path: &str,
        format: &str,
        charset: &str,
        options: ActionOptions,
    ) -> Result<()> {
        let pair = file_pair(capabilities, kind, path, format, charset, options)?;
        self.extend_validated(pair);
        Ok(())
    }

    /// Append several files, keyed by path and visited in path order.
    ///
    /// Each value is `(format, charset)`; a missing charset falls back to
    /// `default_charset`. Nothing is appended unless every file validates.
    pub fn add_files(
        &mut self,
        capabilities: &Capabilities,
        kind: ActionKind,
        files: &BTreeMap<String, (String, Option<String>)>,
        default_charset: &str,
    ) -> Result<()> {
        let mut staged = Vec::with_capacity(files.len() * 2);
        for (path, (format, charset)) in files {
            let charset = charset.as_deref().unwrap_or(default_charset);
            staged.extend(file_pair(
                capabilities,
                kind,
                path,
                format,
                charset,
                ActionOptions::new(),
            )?);
        }
        self.extend_validated(staged);
        Ok(())
    }

    fn extend_validated(&mut self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            debug!(kind = %action.kind, entry = %action.name, "appending action");
            self.actions.push(action);
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

impl<'a> IntoIterator for &'a ActionChain {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

fn file_pair(
    capabilities: &Capabilities,
    kind: ActionKind,
    path: &str,
    format: &str,
    charset: &str,
    options: ActionOptions,
) -> Result<[Action; 2]> {
    if !kind.is_file() {
        return Err(Error::UnknownAction(kind.to_string()));
    }
    let charset = Action::validated(capabilities, ActionKind::Charset, charset, None, ActionOptions::new())?;
    let file = Action::validated(capabilities, kind, format, Some(path), options)?;
    Ok([charset, file])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities::new()
            .with_format("gpx", &["snlen", "suppresswhite"])
            .with_format("kml", &[])
            .with_filter("simplify", &["count", "error"])
            .with_filter("transform", &["wpt", "rte"])
            .with_charset("ISO-8859-1", &["Latin-1", "l1"])
            .with_charset("UTF-8", &["utf8"])
    }

    fn none() -> ActionOptions {
        ActionOptions::new()
    }

    #[test]
    fn test_unknown_action_kind() {
        let mut chain = ActionChain::new();
        let err = chain.add_action(&caps(), "invalid", "gpx", None, none()).unwrap_err();
        assert!(matches!(err, Error::UnknownAction(_)));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        assert_eq!("InFile".parse::<ActionKind>().unwrap(), ActionKind::InputFile);
    }

    #[test]
    fn test_missing_filename_checked_before_options() {
        let mut chain = ActionChain::new();
        let opts = action_options(&[("foobarbaz", Some("badoption"))]);
        let err = chain.add_action(&caps(), "infile", "gpx", None, opts).unwrap_err();
        assert!(matches!(err, Error::MissingFilename { action: "infile" }));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unknown_format() {
        let mut chain = ActionChain::new();
        let err = chain
            .add_action(&caps(), "outfile", "foobarbaz", Some("file"), none())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFormat(name) if name == "foobarbaz"));
    }

    #[test]
    fn test_invalid_format_option() {
        let mut chain = ActionChain::new();
        let bad = action_options(&[("foobarbaz", Some("x"))]);
        let err = chain
            .add_action(&caps(), "infile", "gpx", Some("filename"), bad)
            .unwrap_err();
        match err {
            Error::InvalidOption { owner, option } => {
                assert_eq!(owner, "gpx");
                assert_eq!(option, "foobarbaz");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(chain.is_empty());

        let good = action_options(&[("snlen", Some("6"))]);
        chain
            .add_action(&caps(), "infile", "gpx", Some("filename"), good)
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_filters() {
        let mut chain = ActionChain::new();
        assert!(matches!(
            chain.add_action(&caps(), "filter", "foobarbaz", None, none()),
            Err(Error::UnknownFilter(_))
        ));
        assert!(matches!(
            chain.add_action(
                &caps(),
                "filter",
                "transform",
                None,
                action_options(&[("foobarbaz", Some("invalid"))])
            ),
            Err(Error::InvalidOption { .. })
        ));
        chain
            .add_action(&caps(), "filter", "simplify", None, action_options(&[("count", Some("6"))]))
            .unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_charset_primary_and_alias() {
        let mut chain = ActionChain::new();
        chain.add_action(&caps(), "charset", "ISO-8859-1", None, none()).unwrap();
        chain.add_action(&caps(), "charset", "Latin-1", None, none()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.actions()[1].name(), "Latin-1");
        assert!(matches!(
            chain.add_action(&caps(), "charset", "foobarbaz", None, none()),
            Err(Error::UnknownCharset(_))
        ));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_argument_rendering() {
        let action = Action::validated(
            &caps(),
            ActionKind::Filter,
            "transform",
            None,
            action_options(&[("wpt", Some("trk")), ("rte", None)]),
        )
        .unwrap();
        assert_eq!(action.argument(), "transform,rte,wpt=trk");
    }

    #[test]
    fn test_add_file_prepends_charset() {
        let mut chain = ActionChain::new();
        chain
            .add_file(&caps(), ActionKind::InputFile, "in.gpx", "gpx", "UTF-8", none())
            .unwrap();
        let kinds: Vec<_> = chain.iter().map(Action::kind).collect();
        assert_eq!(kinds, [ActionKind::Charset, ActionKind::InputFile]);
        assert_eq!(chain.actions()[1].path(), Some("in.gpx"));
    }

    #[test]
    fn test_add_file_is_atomic() {
        let mut chain = ActionChain::new();
        assert!(chain
            .add_file(&caps(), ActionKind::OutputFile, "out.x", "nope", "UTF-8", none())
            .is_err());
        assert!(chain
            .add_file(&caps(), ActionKind::OutputFile, "out.gpx", "gpx", "EBCDIC", none())
            .is_err());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_add_files_in_key_order() {
        let mut files = BTreeMap::new();
        files.insert("b.kml".to_string(), ("kml".to_string(), None));
        files.insert("a.gpx".to_string(), ("gpx".to_string(), Some("Latin-1".to_string())));
        let mut chain = ActionChain::new();
        chain
            .add_files(&caps(), ActionKind::InputFile, &files, "UTF-8")
            .unwrap();
        let rendered: Vec<_> = chain
            .iter()
            .map(|a| (a.name().to_string(), a.path().map(str::to_string)))
            .collect();
        assert_eq!(
            rendered,
            [
                ("Latin-1".to_string(), None),
                ("gpx".to_string(), Some("a.gpx".to_string())),
                ("UTF-8".to_string(), None),
                ("kml".to_string(), Some("b.kml".to_string())),
            ]
        );
    }

    #[test]
    fn test_add_files_rejects_all_on_one_failure() {
        let mut files = BTreeMap::new();
        files.insert("a.gpx".to_string(), ("gpx".to_string(), None));
        files.insert("z.bad".to_string(), ("bad".to_string(), None));
        let mut chain = ActionChain::new();
        assert!(chain
            .add_files(&caps(), ActionKind::InputFile, &files, "UTF-8")
            .is_err());
        assert!(chain.is_empty());
    }
}
