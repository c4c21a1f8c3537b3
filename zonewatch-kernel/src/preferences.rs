//! User preferences.
//!
//! The theme lives in the persistent store. Tab, timeframe and navigation
//! belong to the current session and live in the ephemeral store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{DashboardVariant, Timeframe};
use crate::storage::{
    KeyValueStore, StoreError, LAST_ACTIVE_TAB_KEY, LAST_NAVIGATION_KEY, LAST_TIMEFRAME_KEY,
    THEME_KEY,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn load(store: &KeyValueStore) -> Self {
        store.get(THEME_KEY).unwrap_or_default()
    }

    pub fn save(self, store: &KeyValueStore) -> Result<(), StoreError> {
        store.set(THEME_KEY, &self)
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPrefs {
    #[serde(default)]
    pub last_active_tab: Option<DashboardVariant>,
    #[serde(default)]
    pub last_timeframe: Option<Timeframe>,
    #[serde(default)]
    pub last_navigation: Option<String>,
}

impl SessionPrefs {
    pub fn load(session: &KeyValueStore) -> Self {
        Self {
            last_active_tab: session.get(LAST_ACTIVE_TAB_KEY),
            last_timeframe: session.get(LAST_TIMEFRAME_KEY),
            last_navigation: session.get(LAST_NAVIGATION_KEY),
        }
    }

    /// Unset fields remove their key.
    pub fn save(&self, session: &KeyValueStore) -> Result<(), StoreError> {
        put(session, LAST_ACTIVE_TAB_KEY, self.last_active_tab.as_ref())?;
        put(session, LAST_TIMEFRAME_KEY, self.last_timeframe.as_ref())?;
        put(session, LAST_NAVIGATION_KEY, self.last_navigation.as_ref())
    }
}

fn put<T: Serialize>(store: &KeyValueStore, key: &str, value: Option<&T>) -> Result<(), StoreError> {
    match value {
        Some(value) => store.set(key, value),
        None => store.remove(key).map(|_| ()),
    }
}

/// Everything `GET /preferences` returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
    #[serde(flatten)]
    pub session: SessionPrefs,
}

impl Preferences {
    pub fn load(store: &KeyValueStore, session: &KeyValueStore) -> Self {
        Self {
            theme: Theme::load(store),
            session: SessionPrefs::load(session),
        }
    }

    pub fn save(&self, store: &KeyValueStore, session: &KeyValueStore) -> Result<(), StoreError> {
        self.theme.save(store)?;
        self.session.save(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_theme_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = KeyValueStore::persistent(&path).unwrap();
            assert_eq!(Theme::load(&store), Theme::Light);
            Theme::Dark.save(&store).unwrap();
        }
        let store = KeyValueStore::persistent(&path).unwrap();
        assert_eq!(Theme::load(&store), Theme::Dark);
        assert_eq!("DARK".parse::<Theme>().unwrap(), Theme::Dark);
        assert!("blue".parse::<Theme>().is_err());
    }

    #[test]
    fn test_session_prefs_set_and_clear() {
        let session = KeyValueStore::ephemeral();
        let prefs = SessionPrefs {
            last_active_tab: Some(DashboardVariant::Vfe),
            last_timeframe: Some(Timeframe::Last7Days),
            last_navigation: Some("/zones/MZ-1".into()),
        };
        prefs.save(&session).unwrap();
        assert_eq!(SessionPrefs::load(&session), prefs);

        SessionPrefs { last_navigation: None, ..prefs.clone() }.save(&session).unwrap();
        assert!(!session.keys().contains(&LAST_NAVIGATION_KEY.to_string()));
        assert_eq!(SessionPrefs::load(&session).last_active_tab, Some(DashboardVariant::Vfe));
    }

    #[test]
    fn test_preferences_split_between_stores() {
        let store = KeyValueStore::ephemeral();
        let session = KeyValueStore::ephemeral();
        let prefs: Preferences = serde_json::from_value(serde_json::json!({
            "theme": "dark",
            "last_timeframe": "-72h"
        }))
        .unwrap();
        prefs.save(&store, &session).unwrap();

        assert_eq!(store.keys(), vec![THEME_KEY.to_string()]);
        assert_eq!(session.keys(), vec![LAST_TIMEFRAME_KEY.to_string()]);
        assert_eq!(Preferences::load(&store, &session), prefs);
    }
}
