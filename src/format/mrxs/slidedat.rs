//! Minimal `Slidedat.ini` sidecar scanner.
//!
//! Generalizes the pipe-delimited `key=value` scanner `SvsMetadata::parse`
//! uses (see `super::super::svs`) into an INI-style `[Section]` / `key=value`
//! line format. No ini crate appears anywhere in the retrieved example pack,
//! so this stays hand-rolled rather than introducing an ungrounded
//! dependency for a sidecar whose byte-level parsing is out of scope beyond
//! what the plan builder needs.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Slidedat {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Slidedat {
    pub fn parse(text: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = line[1..line.len() - 1].to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }
            if let Some(eq) = line.find('=') {
                let key = line[..eq].trim().to_string();
                let value = line[eq + 1..].trim().to_string();
                sections.entry(current.clone()).or_default().insert(key, value);
            }
        }

        Self { sections }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }

    pub fn get_u32(&self, section: &str, key: &str) -> Option<u32> {
        self.get(section, key)?.parse().ok()
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Option<f64> {
        self.get(section, key)?.parse().ok()
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Option<usize> {
        self.get(section, key)?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_keys() {
        let text = "[GENERAL]\nTILE_WIDTH=512\nOBJECTIVE_NAME = 20x Plan Apo\n\n[LEVEL_0]\nWIDTH=4096\n";
        let ini = Slidedat::parse(text);
        assert_eq!(ini.get_u32("GENERAL", "TILE_WIDTH"), Some(512));
        assert_eq!(ini.get("GENERAL", "OBJECTIVE_NAME"), Some("20x Plan Apo"));
        assert_eq!(ini.get_u32("LEVEL_0", "WIDTH"), Some(4096));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "; comment\n[GENERAL]\n# also a comment\nTILE_WIDTH=256\n";
        let ini = Slidedat::parse(text);
        assert_eq!(ini.get_u32("GENERAL", "TILE_WIDTH"), Some(256));
    }

    #[test]
    fn missing_key_is_none() {
        let ini = Slidedat::parse("[GENERAL]\nTILE_WIDTH=256\n");
        assert_eq!(ini.get("GENERAL", "NOPE"), None);
        assert_eq!(ini.get("NOSECTION", "NOPE"), None);
    }
}
