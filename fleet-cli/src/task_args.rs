//! `task1[:posarg1,posarg2,key=value] task2 …` parsing: commas in a value
//! are escaped as `\,`, `=` in a value as `\=`.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArgs {
    pub positional: Vec<String>,
    pub kwargs: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub args: TaskArgs,
}

/// Splits `name[:arglist]` and parses `arglist` into positional/keyword
/// arguments. A bare task name with no `:` gets an empty `TaskArgs`.
pub fn parse_task_spec(raw: &str) -> TaskSpec {
    match raw.split_once(':') {
        Some((name, arglist)) => TaskSpec {
            name: name.to_string(),
            args: parse_task_args(arglist),
        },
        None => TaskSpec {
            name: raw.to_string(),
            args: TaskArgs::default(),
        },
    }
}

/// Parses a comma-separated `posarg,key=val,...` list. A field is a keyword
/// argument only if it has an unescaped `=` before its first unescaped
/// comma; everything else is positional. `\,` and `\=` are unescaped to
/// their literal characters in the result.
fn parse_task_args(arglist: &str) -> TaskArgs {
    let mut args = TaskArgs::default();
    if arglist.is_empty() {
        return args;
    }

    let mut buf = String::new();
    let mut key: Option<String> = None;
    let mut chars = arglist.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some(&',') | Some(&'=')) => {
                buf.push(chars.next().unwrap());
            }
            '=' if key.is_none() => key = Some(std::mem::take(&mut buf)),
            ',' => match key.take() {
                Some(k) => {
                    args.kwargs.insert(k, std::mem::take(&mut buf));
                }
                None => args.positional.push(std::mem::take(&mut buf)),
            },
            other => buf.push(other),
        }
    }
    match key.take() {
        Some(k) => {
            args.kwargs.insert(k, buf);
        }
        None => args.positional.push(buf),
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_task_name_has_no_args() {
        let spec = parse_task_spec("deploy");
        assert_eq!(spec.name, "deploy");
        assert!(spec.args.positional.is_empty());
        assert!(spec.args.kwargs.is_empty());
    }

    #[test]
    fn positional_and_keyword_args_split_correctly() {
        let spec = parse_task_spec("deploy:web,env=prod");
        assert_eq!(spec.name, "deploy");
        assert_eq!(spec.args.positional, vec!["web".to_string()]);
        assert_eq!(spec.args.kwargs.get("env"), Some(&"prod".to_string()));
    }

    #[test]
    fn escaped_comma_and_equals_survive_into_the_value() {
        let spec = parse_task_spec(r"run:cmd=echo a\,b\=c");
        assert_eq!(spec.args.kwargs.get("cmd"), Some(&"echo a,b=c".to_string()));
    }

    #[test]
    fn multiple_positional_args_preserve_order() {
        let spec = parse_task_spec("put:./app,/opt/app");
        assert_eq!(
            spec.args.positional,
            vec!["./app".to_string(), "/opt/app".to_string()]
        );
    }
}
