// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Literal directives: ISO 15962 check/init URNs and lock types.

use crate::error::ValidationError;
use regex::Regex;
use std::sync::OnceLock;

const CHECK_PATTERN: &str = r"^urn:epcglobal:ale:check:iso15962$";
const INIT_PATTERN: &str = r"^urn:epcglobal:ale:init:iso15962:x(?P<dsfid>[0-9A-Fa-f]{2})(?:\.x(?P<afi>[0-9A-Fa-f]{2}))?(?P<force>\.force)?$";

fn check_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CHECK_PATTERN).ok()).as_ref()
}

fn init_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(INIT_PATTERN).ok()).as_ref()
}

/// Validate a check directive.
pub fn parse_check(text: &str) -> Result<(), ValidationError> {
    if check_regex().is_some_and(|re| re.is_match(text)) {
        Ok(())
    } else {
        Err(ValidationError::InvalidData(format!(
            "'{}' is not a check directive",
            text
        )))
    }
}

/// Parsed init directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InitDirective {
    pub dsfid: u8,
    pub afi: Option<u8>,
    pub force: bool,
}

impl InitDirective {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidData(format!("'{}' is not an init directive", text));
        let caps = init_regex()
            .and_then(|re| re.captures(text))
            .ok_or_else(invalid)?;
        let byte = |name: &str| {
            caps.name(name)
                .map(|m| u8::from_str_radix(m.as_str(), 16).map_err(|_| invalid()))
                .transpose()
        };
        let dsfid = byte("dsfid")?.ok_or_else(invalid)?;
        if dsfid == 0 {
            return Err(ValidationError::InvalidData(
                "init directive DSFID must not be zero".into(),
            ));
        }
        Ok(Self {
            dsfid,
            afi: byte("afi")?,
            force: caps.name("force").is_some(),
        })
    }
}

/// Lock privilege applied by a `LOCK` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Unlock,
    PermaUnlock,
    Lock,
    PermaLock,
}

impl LockType {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        match text {
            "UNLOCK" => Ok(Self::Unlock),
            "PERMAUNLOCK" => Ok(Self::PermaUnlock),
            "LOCK" => Ok(Self::Lock),
            "PERMALOCK" => Ok(Self::PermaLock),
            other => Err(ValidationError::InvalidData(format!(
                "'{}' is not a lock type",
                other
            ))),
        }
    }

    /// Ordinal carried on the wire.
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        assert!(parse_check("urn:epcglobal:ale:check:iso15962").is_ok());
        assert!(parse_check("urn:epcglobal:ale:check:iso15961").is_err());
    }

    #[test]
    fn test_parse_init_full() {
        let init = InitDirective::parse("urn:epcglobal:ale:init:iso15962:x03.xA1.force").unwrap();
        assert_eq!(
            init,
            InitDirective {
                dsfid: 0x03,
                afi: Some(0xA1),
                force: true
            }
        );
    }

    #[test]
    fn test_parse_init_minimal() {
        let init = InitDirective::parse("urn:epcglobal:ale:init:iso15962:x03").unwrap();
        assert_eq!(init.afi, None);
        assert!(!init.force);
    }

    #[test]
    fn test_parse_init_rejects() {
        assert!(InitDirective::parse("urn:epcglobal:ale:init:iso15962:x00").is_err());
        assert!(InitDirective::parse("urn:epcglobal:ale:init:iso15962:3").is_err());
        assert!(InitDirective::parse("urn:epcglobal:ale:init:iso15962:x03.force.xA1").is_err());
    }

    #[test]
    fn test_lock_ordinals() {
        assert_eq!(LockType::parse("UNLOCK").unwrap().ordinal(), 0);
        assert_eq!(LockType::parse("PERMALOCK").unwrap().ordinal(), 3);
        assert!(LockType::parse("lock").is_err());
    }
}
