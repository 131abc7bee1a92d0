use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A browser profile on disk, as handed to us by whatever detected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub path: PathBuf,
    pub browser_id: String,
    pub name: String,
}

impl Profile {
    pub fn new(path: impl Into<PathBuf>, browser_id: &str, name: &str) -> Self {
        Self {
            path: path.into(),
            browser_id: browser_id.to_string(),
            name: name.to_string(),
        }
    }

    /// Profile named after its directory.
    pub fn from_dir(path: impl Into<PathBuf>, browser_id: &str) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        Self {
            path,
            browser_id: browser_id.to_string(),
            name,
        }
    }

    pub fn family(&self) -> Option<BrowserFamily> {
        BrowserFamily::from_browser_id(&self.browser_id)
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }
}

/// `BROWSER_ID:PATH`, the form profiles take on the command line.
impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (browser_id, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected BROWSER_ID:PATH, got '{}'", s))?;
        if browser_id.is_empty() || path.is_empty() {
            return Err(format!("expected BROWSER_ID:PATH, got '{}'", s));
        }
        Ok(Profile::from_dir(PathBuf::from(path), &browser_id.to_lowercase()))
    }
}

/// Store lineage of a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Firefox,
    Chromium,
    WebKit,
    Text,
    Exotic,
}

const FAMILY_TABLE: &[(&str, BrowserFamily)] = &[
    ("firefox", BrowserFamily::Firefox),
    ("floorp", BrowserFamily::Firefox),
    ("librewolf", BrowserFamily::Firefox),
    ("waterfox", BrowserFamily::Firefox),
    ("pale_moon", BrowserFamily::Firefox),
    ("basilisk", BrowserFamily::Firefox),
    ("seamonkey", BrowserFamily::Firefox),
    ("tor_browser", BrowserFamily::Firefox),
    ("chrome", BrowserFamily::Chromium),
    ("chromium", BrowserFamily::Chromium),
    ("edge", BrowserFamily::Chromium),
    ("brave", BrowserFamily::Chromium),
    ("opera", BrowserFamily::Chromium),
    ("vivaldi", BrowserFamily::Chromium),
    ("opera_gx", BrowserFamily::Chromium),
    ("safari", BrowserFamily::WebKit),
    ("gnome_web", BrowserFamily::WebKit),
    ("konqueror", BrowserFamily::WebKit),
    ("falkon", BrowserFamily::WebKit),
    ("qutebrowser", BrowserFamily::WebKit),
    ("elinks", BrowserFamily::Text),
    ("links", BrowserFamily::Text),
    ("lynx", BrowserFamily::Text),
    ("w3m", BrowserFamily::Text),
    ("dillo", BrowserFamily::Exotic),
    ("netsurf", BrowserFamily::Exotic),
];

impl BrowserFamily {
    pub fn from_browser_id(browser_id: &str) -> Option<Self> {
        let id = browser_id.to_lowercase().replace('-', "_");
        FAMILY_TABLE
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, family)| *family)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrowserFamily::Firefox => "Firefox",
            BrowserFamily::Chromium => "Chromium",
            BrowserFamily::WebKit => "WebKit",
            BrowserFamily::Text => "Text",
            BrowserFamily::Exotic => "Exotic",
        }
    }
}

impl fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bookmarks,
    History,
    Passwords,
    Cookies,
    Extensions,
    Preferences,
    Sessions,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::Bookmarks,
        DataType::History,
        DataType::Passwords,
        DataType::Cookies,
        DataType::Extensions,
        DataType::Preferences,
        DataType::Sessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bookmarks => "bookmarks",
            DataType::History => "history",
            DataType::Passwords => "passwords",
            DataType::Cookies => "cookies",
            DataType::Extensions => "extensions",
            DataType::Preferences => "preferences",
            DataType::Sessions => "sessions",
        }
    }

    /// Stores that only make sense as a whole, like logins and the key
    /// database that encrypts them. They are copied or kept, never merged.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, DataType::Passwords | DataType::Cookies)
    }

    /// Native file names holding this data type for a family.
    /// Entries ending in `/` are directories.
    pub fn native_files(&self, family: BrowserFamily) -> &'static [&'static str] {
        match (family, self) {
            (BrowserFamily::Firefox, DataType::Bookmarks) => &["places.sqlite"],
            (BrowserFamily::Firefox, DataType::History) => &["places.sqlite"],
            (BrowserFamily::Firefox, DataType::Passwords) => &["logins.json", "key4.db"],
            (BrowserFamily::Firefox, DataType::Cookies) => &["cookies.sqlite"],
            (BrowserFamily::Firefox, DataType::Extensions) => &["extensions/", "extensions.json"],
            (BrowserFamily::Firefox, DataType::Preferences) => &["prefs.js", "user.js"],
            (BrowserFamily::Firefox, DataType::Sessions) => &["sessionstore.jsonlz4"],
            (BrowserFamily::Chromium, DataType::Bookmarks) => &["Bookmarks"],
            (BrowserFamily::Chromium, DataType::History) => &["History"],
            (BrowserFamily::Chromium, DataType::Passwords) => &["Login Data"],
            (BrowserFamily::Chromium, DataType::Cookies) => &["Cookies"],
            (BrowserFamily::Chromium, DataType::Extensions) => &["Extensions/"],
            (BrowserFamily::Chromium, DataType::Preferences) => &["Preferences"],
            (BrowserFamily::Chromium, DataType::Sessions) => &["Current Session"],
            _ => &[],
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown data type '{}'", s))
    }
}

/// How a generic file or store is combined with the target's copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Smart,
    Append,
    Overwrite,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Smart => "smart",
            MergeStrategy::Append => "append",
            MergeStrategy::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smart" => Ok(MergeStrategy::Smart),
            "append" => Ok(MergeStrategy::Append),
            "overwrite" => Ok(MergeStrategy::Overwrite),
            other => Err(format!("unknown merge strategy '{}'", other)),
        }
    }
}

/// Parse a comma separated list such as `bookmarks,history`. `all` selects every type.
pub fn parse_data_types(list: &str) -> std::result::Result<Vec<DataType>, String> {
    if list.trim().eq_ignore_ascii_case("all") {
        return Ok(DataType::ALL.to_vec());
    }
    let mut types = Vec::new();
    for part in list.split(',').filter(|p| !p.trim().is_empty()) {
        let data_type: DataType = part.parse()?;
        if !types.contains(&data_type) {
            types.push(data_type);
        }
    }
    if types.is_empty() {
        return Err("no data types selected".to_string());
    }
    Ok(types)
}
