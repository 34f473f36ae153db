use serde_json::Value;

/// Path prefix pair, both sides normalized to `/` separators with a trailing `/`.
#[derive(Debug, Clone)]
struct Rule {
    backend: String,
    client: String,
    backend_raw: String,
    client_raw: String,
}

/// Rewrites source paths between the backend (debug info) and the client.
///
/// Built from the `sourceMap` launch argument, an object of
/// `backend prefix -> client prefix`. The longest matching prefix wins.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    rules: Vec<Rule>,
}

impl SourceMap {
    pub fn from_launch_args(arguments: &Value) -> Self {
        let Some(Value::Object(map)) = arguments.get("sourceMap") else {
            return SourceMap::default();
        };

        let rules = map
            .iter()
            .filter_map(|(backend, client)| {
                let client = client.as_str()?;
                Some(Rule {
                    backend: prefix(backend),
                    client: prefix(client),
                    backend_raw: backend.clone(),
                    client_raw: client.to_string(),
                })
            })
            .collect();
        SourceMap { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn to_client(&self, backend_path: &str) -> String {
        self.rewrite(backend_path, |r| (&r.backend, &r.client_raw))
    }

    pub fn to_backend(&self, client_path: &str) -> String {
        self.rewrite(client_path, |r| (&r.client, &r.backend_raw))
    }

    fn rewrite<'a>(&'a self, path: &str, sides: impl Fn(&'a Rule) -> (&'a String, &'a String)) -> String {
        let normalized = path.replace('\\', "/");
        let matched = self
            .rules
            .iter()
            .map(sides)
            .filter(|(from, _)| {
                normalized.starts_with(from.as_str()) || normalized == from[..from.len() - 1]
            })
            .max_by_key(|(from, _)| from.len());

        match matched {
            Some((from, to)) => {
                let suffix = normalized.get(from.len()..).unwrap_or_default();
                join(to, suffix)
            }
            None => path.to_string(),
        }
    }
}

fn prefix(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    if !p.ends_with('/') {
        p.push('/');
    }
    p
}

/// Append a `/` separated suffix in the separator style of `base`.
fn join(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return base.to_string();
    }
    let sep = if base.contains('\\') { '\\' } else { '/' };
    let mut out = base.to_string();
    if !out.ends_with(['/', '\\']) {
        out.push(sep);
    }
    if sep == '\\' {
        out.push_str(&suffix.replace('/', "\\"));
    } else {
        out.push_str(suffix);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_longest_prefix_wins() {
        let map = SourceMap::from_launch_args(&json!({"sourceMap": {
            "/build": "/home/me/project",
            "/build/vendor": "/opt/vendor",
        }}));
        assert_eq!(map.to_client("/build/src/a.c"), "/home/me/project/src/a.c");
        assert_eq!(map.to_client("/build/vendor/z.c"), "/opt/vendor/z.c");
        assert_eq!(map.to_client("/usr/include/stdio.h"), "/usr/include/stdio.h");
        assert_eq!(map.to_backend("/home/me/project/src/a.c"), "/build/src/a.c");
    }

    #[test]
    fn test_prefix_matches_whole_components() {
        let map = SourceMap::from_launch_args(&json!({"sourceMap": {"/build": "/src"}}));
        assert_eq!(map.to_client("/buildx/a.c"), "/buildx/a.c");
        assert_eq!(map.to_client("/build"), "/src");
    }

    #[test]
    fn test_windows_client() {
        let map = SourceMap::from_launch_args(&json!({"sourceMap": {"/build": "C:\\work"}}));
        assert_eq!(map.to_client("/build/src/a.c"), "C:\\work\\src\\a.c");
        assert_eq!(map.to_backend("C:\\work\\src\\a.c"), "/build/src/a.c");
    }

    #[test]
    fn test_no_map() {
        let map = SourceMap::from_launch_args(&json!({"program": "/bin/true"}));
        assert!(map.is_empty());
        assert_eq!(map.to_backend("/a/b.c"), "/a/b.c");
    }
}
