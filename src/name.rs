//! Ollama-style model names: `[host/][namespace/]model[:tag]`
//!
//! Clients are free to spell the same model several ways (`llama3.2`, `llama3.2:latest`,
//! `library/llama3.2:latest`, ...). The router keys everything on the canonical configured id
//! but also accepts the shortest display form so that all of these land on the same model.

const DEFAULT_HOST: &str = "registry.ollama.ai";
const DEFAULT_NAMESPACE: &str = "library";
const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelName {
    pub host: String,
    pub namespace: String,
    pub model: String,
    pub tag: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Part {
    Host,
    Namespace,
    Model,
    Tag,
}

impl ModelName {
    /// Parses a name, filling the default host, namespace and tag where absent.
    ///
    /// Separators with nothing on one side (`"llama:"`, `"/llama"`) produce an empty part,
    /// which [`ModelName::is_valid`] rejects.
    pub fn parse(s: &str) -> Self {
        let mut rest = s;
        let mut tag = None;
        // '/' can't appear in a tag, so a ':' after the last '/' is the tag separator
        if rest.rfind(':') > rest.rfind('/') {
            let (before, after) = cut_last(rest, ':');
            rest = before;
            tag = Some(after);
        }

        let (host, namespace, model) = match rest.rsplit_once('/') {
            None => (None, None, rest),
            Some((before, model)) => match before.rsplit_once('/') {
                None => (None, Some(before), model),
                Some((host, namespace)) => {
                    let host = host.split_once("://").map_or(host, |(_, host)| host);
                    (Some(host), Some(namespace), model)
                }
            },
        };

        ModelName {
            host: host.unwrap_or(DEFAULT_HOST).to_string(),
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
            model: model.to_string(),
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_part(Part::Host, &self.host)
            && is_valid_part(Part::Namespace, &self.namespace)
            && is_valid_part(Part::Model, &self.model)
            && is_valid_part(Part::Tag, &self.tag)
    }

    /// The shortest unambiguous spelling. Default host and namespace are dropped, the tag is
    /// always kept: `llama3.2` displays as `llama3.2:latest`.
    pub fn display_shortest(&self) -> String {
        let mut out = String::new();
        if !self.host.eq_ignore_ascii_case(DEFAULT_HOST) {
            out.push_str(&self.host);
            out.push('/');
            out.push_str(&self.namespace);
            out.push('/');
        } else if !self.namespace.eq_ignore_ascii_case(DEFAULT_NAMESPACE) {
            out.push_str(&self.namespace);
            out.push('/');
        }
        out.push_str(&self.model);
        out.push(':');
        out.push_str(&self.tag);
        out
    }
}

fn cut_last(s: &str, sep: char) -> (&str, &str) {
    match s.rfind(sep) {
        Some(i) => (&s[..i], &s[i + sep.len_utf8()..]),
        None => (s, ""),
    }
}

fn is_valid_part(kind: Part, s: &str) -> bool {
    let max_len = if kind == Part::Host { 350 } else { 80 };
    if s.is_empty() || s.len() > max_len {
        return false;
    }
    s.bytes().enumerate().all(|(i, c)| {
        if i == 0 {
            return c.is_ascii_alphanumeric() || c == b'_';
        }
        match c {
            b'_' | b'-' => true,
            b'.' => kind != Part::Namespace,
            b':' => kind == Part::Host,
            c => c.is_ascii_alphanumeric(),
        }
    })
}

/// Shortest display form of `id`, if it parses as a valid model name.
pub fn shortest(id: &str) -> Option<String> {
    let name = ModelName::parse(id);
    name.is_valid().then(|| name.display_shortest())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fills_defaults() {
        let name = ModelName::parse("llama3.2");
        assert_eq!(name.host, "registry.ollama.ai");
        assert_eq!(name.namespace, "library");
        assert_eq!(name.model, "llama3.2");
        assert_eq!(name.tag, "latest");
        assert!(name.is_valid());
    }

    #[test]
    fn test_parse_full_name() {
        let name = ModelName::parse("https://example.com:5000/team/coder:7b-q4");
        assert_eq!(name.host, "example.com:5000");
        assert_eq!(name.namespace, "team");
        assert_eq!(name.model, "coder");
        assert_eq!(name.tag, "7b-q4");
        assert!(name.is_valid());
    }

    #[test]
    fn test_display_shortest() {
        assert_eq!(shortest("llama3.2").as_deref(), Some("llama3.2:latest"));
        assert_eq!(shortest("llama3.2:latest").as_deref(), Some("llama3.2:latest"));
        assert_eq!(
            shortest("library/deepseek-r1:14b").as_deref(),
            Some("deepseek-r1:14b")
        );
        assert_eq!(shortest("someone/phi:2").as_deref(), Some("someone/phi:2"));
        assert_eq!(
            shortest("example.com/team/coder").as_deref(),
            Some("example.com/team/coder:latest")
        );
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(shortest(""), None);
        assert_eq!(shortest("llama:"), None);
        assert_eq!(shortest("-llama"), None);
        assert_eq!(shortest("team.name/llama"), None);
        assert_eq!(shortest("lla ma"), None);
        assert_eq!(shortest(&"a".repeat(81)), None);
    }
}
