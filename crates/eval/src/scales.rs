//! Ordinal scales of the threat-model domain.
//!
//! Each scale is an ordered list of enumeration names; a name's position
//! is its ordinal, which is what casts compare.

/// An ordered enumeration. Lookups trim and ignore ASCII case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub name: &'static str,
    pub values: &'static [&'static str],
    /// Value an empty string stands for, if the scale has one.
    pub empty_default: Option<&'static str>,
}

impl Scale {
    pub fn ordinal(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        let text = match (text.is_empty(), self.empty_default) {
            (true, Some(default)) => default,
            _ => text,
        };
        self.values.iter().position(|v| v.eq_ignore_ascii_case(text))
    }

    pub fn name_of(&self, ordinal: usize) -> Option<&'static str> {
        self.values.get(ordinal).copied()
    }
}

pub static CONFIDENTIALITY: Scale = Scale {
    name: "confidentiality",
    values: &[
        "public",
        "internal",
        "restricted",
        "confidential",
        "strictly-confidential",
    ],
    empty_default: None,
};

pub static CRITICALITY: Scale = Scale {
    name: "criticality",
    values: &[
        "archive",
        "operational",
        "important",
        "critical",
        "mission-critical",
    ],
    empty_default: None,
};

pub static AUTHENTICATION: Scale = Scale {
    name: "authentication",
    values: &[
        "none",
        "credentials",
        "session-id",
        "token",
        "client-certificate",
        "two-factor",
        "externalized",
    ],
    empty_default: None,
};

pub static AUTHORIZATION: Scale = Scale {
    name: "authorization",
    values: &["none", "technical-user", "end-user-identity-propagation"],
    empty_default: None,
};

pub static PROBABILITY: Scale = Scale {
    name: "probability",
    values: &["improbable", "possible", "probable"],
    empty_default: Some("possible"),
};

pub static ENCRYPTION: Scale = Scale {
    name: "encryption",
    values: &[
        "none",
        "transparent",
        "data-with-symmetric-shared-key",
        "data-with-asymmetric-shared-key",
        "data-with-end-user-individual-key",
    ],
    empty_default: None,
};

pub static QUANTITY: Scale = Scale {
    name: "quantity",
    values: &["very-few", "few", "many", "very-many"],
    empty_default: None,
};

pub static SIZE: Scale = Scale {
    name: "size",
    values: &["system", "service", "application", "component"],
    empty_default: None,
};

pub static LIKELIHOOD: Scale = Scale {
    name: "likelihood",
    values: &["unlikely", "likely", "very-likely", "frequent"],
    empty_default: None,
};

pub static IMPACT: Scale = Scale {
    name: "impact",
    values: &["low", "medium", "high", "very-high"],
    empty_default: None,
};

pub static SEVERITY: Scale = Scale {
    name: "severity",
    values: &["low", "medium", "elevated", "high", "critical"],
    empty_default: Some("medium"),
};

/// Severity for a likelihood and impact ordinal: the product of their
/// weights (ordinal + 1) is bucketed into the severity scale.
/// Returns `None` when either ordinal is off its scale.
pub fn calculate_severity(likelihood: usize, impact: usize) -> Option<&'static str> {
    LIKELIHOOD.name_of(likelihood)?;
    IMPACT.name_of(impact)?;
    let product = (likelihood + 1) * (impact + 1);
    let severity = match product {
        0..=1 => "low",
        2..=3 => "medium",
        4..=8 => "elevated",
        9..=12 => "high",
        _ => "critical",
    };
    Some(severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_ignores_case_and_whitespace() {
        assert_eq!(CONFIDENTIALITY.ordinal("Strictly-Confidential "), Some(4));
        assert_eq!(CONFIDENTIALITY.ordinal("public"), Some(0));
        assert_eq!(CONFIDENTIALITY.ordinal("secret"), None);
    }

    #[test]
    fn empty_string_uses_scale_default() {
        assert_eq!(PROBABILITY.ordinal(""), Some(1));
        assert_eq!(SEVERITY.ordinal(""), Some(1));
        assert_eq!(CRITICALITY.ordinal(""), None);
    }

    #[test]
    fn severity_table() {
        assert_eq!(calculate_severity(0, 0), Some("low"));
        assert_eq!(calculate_severity(1, 0), Some("medium"));
        assert_eq!(calculate_severity(0, 2), Some("medium"));
        assert_eq!(calculate_severity(1, 1), Some("elevated"));
        assert_eq!(calculate_severity(1, 3), Some("elevated"));
        assert_eq!(calculate_severity(2, 2), Some("high"));
        assert_eq!(calculate_severity(3, 2), Some("high"));
        assert_eq!(calculate_severity(3, 3), Some("critical"));
        assert_eq!(calculate_severity(4, 0), None);
    }
}
