//! §3 / §9: `RateLimitKey`, a tagged sum type with an injective `as_string`
//! projection. Each variant owns a disjoint prefix so no two variants can
//! ever collide on the same stringified key.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    Ip(String),
    Subject(i64),
    Path(String),
    Composite(String, String),
}

impl RateLimitKey {
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Ip(addr) => write!(f, "ip:{addr}"),
            RateLimitKey::Subject(user_id) => write!(f, "subject:{user_id}"),
            RateLimitKey::Path(path) => write!(f, "path:{path}"),
            RateLimitKey::Composite(ns, value) => write!(f, "composite:{ns}:{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_have_disjoint_prefixes() {
        let keys = [
            RateLimitKey::Ip("1.2.3.4".into()),
            RateLimitKey::Subject(42),
            RateLimitKey::Path("/telegram/webhook".into()),
            RateLimitKey::Composite("ip_ua".into(), "1.2.3.4|UA".into()),
        ];
        let strings: Vec<String> = keys.iter().map(RateLimitKey::as_string).collect();
        for (i, a) in strings.iter().enumerate() {
            for (j, b) in strings.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn composite_does_not_collide_with_ip_holding_same_bytes() {
        // A composite value chosen to look like an ip-prefixed string must
        // still stringify distinctly because of the variant prefix.
        let ip = RateLimitKey::Ip("composite:ip_ua:x".into());
        let composite = RateLimitKey::Composite("ip_ua".into(), "x".into());
        assert_ne!(ip.as_string(), composite.as_string());
    }
}
