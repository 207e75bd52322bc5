// src/compose/checkpoint.rs

//! Compose checkpoints
//!
//! A free-form JSON map stored on the compose row. Phases mark themselves
//! done here so a resumed compose can skip them; some phases also store a
//! value (the completed repository path).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoints(BTreeMap<String, Value>);

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the stored JSON; an empty string is an empty map
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether `key` has been recorded with a truthy value
    pub fn is_done(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn mark_done(&mut self, key: &str) {
        self.0.insert(key.to_string(), Value::Bool(true));
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_markers() {
        let mut cp = Checkpoints::parse("").unwrap();
        assert!(cp.is_empty());
        assert!(!cp.is_done("updateinfo"));

        cp.mark_done("updateinfo");
        cp.set_str("completed_repo", "/srv/composes/f40-updates-240101.0");
        assert!(cp.is_done("updateinfo"));
        assert!(cp.is_done("completed_repo"));

        let json = cp.to_json().unwrap();
        let back = Checkpoints::parse(&json).unwrap();
        assert_eq!(back, cp);
        assert_eq!(
            back.get_str("completed_repo"),
            Some("/srv/composes/f40-updates-240101.0")
        );
    }

    #[test]
    fn test_false_marker_is_not_done() {
        let cp = Checkpoints::parse(r#"{"updateinfo": false, "sign_repo": true}"#).unwrap();
        assert!(!cp.is_done("updateinfo"));
        assert!(cp.is_done("sign_repo"));
        assert_eq!(cp.keys().collect::<Vec<_>>(), vec!["sign_repo", "updateinfo"]);
    }
}
