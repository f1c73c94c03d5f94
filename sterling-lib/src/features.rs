//! Optional feature toggles controlled from the command line with
//! `-W name`, `-W no-name` or `-W name=value`.

/// Features known to the configuration front-end.
#[derive(Debug, Clone)]
pub struct Features {
    /// Resolve host names found in the configuration file. When off,
    /// addresses must be numeric.
    pub dns: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features { dns: true }
    }
}

/// (name, description) pairs for help output.
pub const FEATURE_DESCRIPTIONS: &[(&str, &str)] =
    &[("dns", "resolve host names found in configuration file (default)")];

impl Features {
    /// Apply a `-W` argument. `no-` prefixes disable; `name=value`
    /// forms are rejected for features that take no value.
    pub fn set(&mut self, spec: &str) -> Result<(), String> {
        let (name, value) = match spec.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (spec, None),
        };

        let (name, enabled) = if value.is_none() {
            match name.strip_prefix("no-") {
                Some(rest) => (rest, false),
                None => (name, true),
            }
        } else {
            (name, true)
        };

        match name {
            "dns" if value.is_none() => {
                self.dns = enabled;
                Ok(())
            }
            _ => Err(format!("invalid feature name: {spec}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_dns() {
        let mut f = Features::default();
        assert!(f.dns);
        f.set("no-dns").expect("disable");
        assert!(!f.dns);
        f.set("dns").expect("enable");
        assert!(f.dns);
    }

    #[test]
    fn rejects_value_for_plain_feature() {
        let mut f = Features::default();
        assert!(f.set("dns=1").is_err());
        assert!(f.set("unknown").is_err());
    }
}
