//! Build descriptor (Dockerfile) rendering for the final image.
//!
//! The descriptor format has no way to unset a field, so anything absent
//! from the merged config is simply not emitted.
//!
//! `ENV`, `VOLUME`, `WORKDIR` and `USER` arguments go through the builder's
//! word expansion. Plain values are written as is; anything that expansion
//! would alter is double-quoted with `"`, `\` and `$` escaped.

use std::fmt::{self, Write as _};

use super::config::{CommandForm, RunnerImageConfig};

/// One line of the build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    From(String),
    Maintainer(String),
    Cmd(CommandForm),
    Entrypoint(CommandForm),
    Expose(String),
    Volume(String),
    Workdir(String),
    User(String),
    Env(String, String),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::From(image) => write!(f, "FROM {}", image),
            Directive::Maintainer(author) => write!(f, "MAINTAINER {}", author),
            Directive::Cmd(cmd) => write!(f, "CMD {}", CommandLiteral(cmd)),
            Directive::Entrypoint(ep) => write!(f, "ENTRYPOINT {}", CommandLiteral(ep)),
            Directive::Expose(port) => write!(f, "EXPOSE {}", port),
            Directive::Volume(path) => write!(f, "VOLUME {}", Word(path)),
            Directive::Workdir(dir) => write!(f, "WORKDIR {}", Word(dir)),
            Directive::User(user) => write!(f, "USER {}", Word(user)),
            Directive::Env(key, value) if Word::needs_quoting(value) => {
                write!(f, "ENV {}={}", key, Word(value))
            }
            Directive::Env(key, value) => write!(f, "ENV {} {}", key, value),
        }
    }
}

/// A single argument, quoted only when word expansion would change it.
struct Word<'a>(&'a str);

impl Word<'_> {
    fn needs_quoting(value: &str) -> bool {
        value.is_empty()
            || value
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '$'))
    }
}

impl fmt::Display for Word<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !Self::needs_quoting(self.0) {
            return f.write_str(self.0);
        }
        f.write_char('"')?;
        for c in self.0.chars() {
            match c {
                '"' | '\\' | '$' => {
                    f.write_char('\\')?;
                    f.write_char(c)?;
                }
                // a descriptor line cannot hold a newline; fold it into a continuation
                '\n' => f.write_str("\\\n")?,
                _ => f.write_char(c)?,
            }
        }
        f.write_char('"')
    }
}

/// Exec form as a JSON list literal, shell form verbatim.
struct CommandLiteral<'a>(&'a CommandForm);

impl fmt::Display for CommandLiteral<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            CommandForm::Shell(line) => f.write_str(line),
            CommandForm::Exec(args) => {
                let literal = serde_json::to_string(args).map_err(|_| fmt::Error)?;
                f.write_str(&literal)
            }
        }
    }
}

/// Ordered directives for an image built `FROM` the committed runner image.
pub fn directives(from_image: &str, config: &RunnerImageConfig) -> Vec<Directive> {
    let mut out = vec![Directive::From(from_image.to_string())];

    if let Some(author) = config.author.as_deref()
        && !author.is_empty()
    {
        out.push(Directive::Maintainer(author.to_string()));
    }
    if let Some(cmd) = &config.cmd {
        out.push(Directive::Cmd(cmd.clone()));
    }
    if let Some(ep) = &config.entrypoint {
        out.push(Directive::Entrypoint(ep.clone()));
    }
    out.extend(config.exposed_ports.iter().cloned().map(Directive::Expose));
    out.extend(config.volumes.iter().cloned().map(Directive::Volume));
    if let Some(dir) = &config.working_dir {
        out.push(Directive::Workdir(dir.clone()));
    }
    if let Some(user) = &config.user {
        out.push(Directive::User(user.clone()));
    }
    out.extend(
        config
            .env
            .iter()
            .map(|(k, v)| Directive::Env(k.clone(), v.clone())),
    );

    out
}

/// Render the descriptor text, one directive per line.
pub fn render(from_image: &str, config: &RunnerImageConfig) -> String {
    directives(from_image, config)
        .iter()
        .map(|d| format!("{}\n", d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ImageConfig;
    use crate::images::ConfigOverrides;

    #[test]
    fn test_render_merged_env_and_cmd() {
        let base = ImageConfig {
            cmd: Some(vec!["a".into()]),
            env: vec!["X=1".into()],
            ..Default::default()
        };
        let mut overrides = ConfigOverrides::default();
        overrides.env.insert("Y".into(), "2".into());

        let config = RunnerImageConfig::merge(&base, &overrides);
        let text = render("app:1-stage", &config);

        assert_eq!(text, "FROM app:1-stage\nCMD [\"a\"]\nENV X 1\nENV Y 2\n");
    }

    #[test]
    fn test_full_directive_order() {
        let mut config = RunnerImageConfig {
            author: Some("ops@example.com".into()),
            entrypoint: Some(CommandForm::Exec(vec!["/bin/app".into(), "-v".into()])),
            cmd: Some(CommandForm::Shell("serve".into())),
            working_dir: Some("/srv".into()),
            user: Some("app".into()),
            ..Default::default()
        };
        config.exposed_ports.insert("8080/tcp".into());
        config.exposed_ports.insert("9090/tcp".into());
        config.volumes.insert("/var/lib/app".into());
        config.env.insert("MODE".into(), "prod".into());

        let text = render("base", &config);
        let expected = "\
FROM base
MAINTAINER ops@example.com
CMD serve
ENTRYPOINT [\"/bin/app\",\"-v\"]
EXPOSE 8080/tcp
EXPOSE 9090/tcp
VOLUME /var/lib/app
WORKDIR /srv
USER app
ENV MODE prod
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_empty_author_omitted() {
        let config = RunnerImageConfig {
            author: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            directives("base", &config),
            vec![Directive::From("base".into())]
        );
    }

    #[test]
    fn test_exec_form_escapes_quotes() {
        let d = Directive::Cmd(CommandForm::Exec(vec!["echo".into(), "say \"hi\"".into()]));
        assert_eq!(d.to_string(), r#"CMD ["echo","say \"hi\""]"#);
    }

    fn render_env(entries: &[&str]) -> String {
        let base = ImageConfig {
            env: entries.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        };
        let config = RunnerImageConfig::merge(&base, &ConfigOverrides::default());
        render("app:1-stage", &config)
    }

    #[test]
    fn test_empty_env_value_is_quoted() {
        assert_eq!(
            render_env(&["EMPTY="]),
            "FROM app:1-stage\nENV EMPTY=\"\"\n"
        );
    }

    #[test]
    fn test_env_value_with_quotes_is_escaped() {
        assert_eq!(
            render_env(&["Q=say \"hi\"", "B=a\\b"]),
            "FROM app:1-stage\nENV Q=\"say \\\"hi\\\"\"\nENV B=\"a\\\\b\"\n"
        );
    }

    #[test]
    fn test_env_value_with_dollar_is_not_expanded() {
        assert_eq!(
            render_env(&["D=$HOME/x", "PLAIN=1"]),
            "FROM app:1-stage\nENV D=\"\\$HOME/x\"\nENV PLAIN 1\n"
        );
    }

    #[test]
    fn test_path_arguments_quoted_when_needed() {
        assert_eq!(
            Directive::Workdir("/srv/my app".into()).to_string(),
            r#"WORKDIR "/srv/my app""#
        );
        assert_eq!(
            Directive::Volume("/data/$x".into()).to_string(),
            r#"VOLUME "/data/\$x""#
        );
        assert_eq!(Directive::User("app".into()).to_string(), "USER app");
    }
}
