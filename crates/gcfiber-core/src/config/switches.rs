//! Compile-time switch table and the override-file format
//!
//! Included by `build.rs` to generate `config::defaults`, and compiled into
//! the crate's tests. An override file holds `pub const NAME: TYPE = VALUE;`
//! lines; anything else except blank lines and `//` comments is reported.

use std::fmt;

/// One compile-time switch
pub struct Switch {
    pub name: &'static str,
    pub ty: &'static str,
    pub default: &'static str,
}

const fn switch(name: &'static str, ty: &'static str, default: &'static str) -> Switch {
    Switch { name, ty, default }
}

pub const SWITCHES: &[Switch] = &[
    // object layout
    switch("LARGE_OBJECT_THRESHOLD", "usize", "2048"),
    switch("CACHE_ALIGN_THRESHOLD", "usize", "2048"),
    // GC debugging and profiling
    switch("GC_VERIFY", "&str", "\"off\""),
    switch("MEMDEBUG", "bool", "false"),
    switch("GC_ASSERT_PARENT_VALIDITY", "bool", "false"),
    switch("GC_SMALL_PAGE", "bool", "false"),
    switch("GC_FINAL_STATS", "bool", "false"),
    switch("MEMPROFILE", "bool", "false"),
    switch("GC_TIME", "bool", "false"),
    switch(
        "DEFAULT_COLLECT_INTERVAL",
        "usize",
        "5600 * 1024 * core::mem::size_of::<usize>()",
    ),
    // tasks
    switch("COPY_STACKS", "&str", "\"enabled\""),
    switch(
        "STACK_SIZE",
        "usize",
        "if cfg!(target_pointer_width = \"64\") { 8 * 1024 * 1024 } else { 2 * 1024 * 1024 }",
    ),
    switch("MIGRATE_TASKS", "bool", "true"),
    // threading
    switch("DEFAULT_THREAD_SLEEP_THRESHOLD_NS", "u64", "100 * 1000"),
    switch("NUM_THREADS", "usize", "1"),
    switch("MACHINE_EXCLUSIVE", "bool", "false"),
];

/// A line of an override file that was not applied (1-based line numbers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    Malformed { line: usize },
    Unknown { line: usize, name: String },
    WrongType {
        line: usize,
        name: String,
        expected: &'static str,
        found: String,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::Malformed { line } => write!(f, "line {}: expected `pub const NAME: TYPE = VALUE;`", line),
            Issue::Unknown { line, name } => write!(f, "line {}: unknown switch {}", line, name),
            Issue::WrongType {
                line,
                name,
                expected,
                found,
            } => write!(f, "line {}: {} is {}, not {}", line, name, expected, found),
        }
    }
}

/// Split `pub const NAME: TYPE = VALUE;` into its three parts
fn split_const(line: &str) -> Option<(&str, &str, &str)> {
    let rest = line.strip_prefix("pub const ")?;
    let (name, rest) = rest.split_once(':')?;
    let (ty, value) = rest.split_once('=')?;
    let value = value.trim().strip_suffix(';')?.trim();
    let name = name.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, ty.trim(), value))
}

fn normalize_type(ty: &str) -> String {
    ty.replace("'static", "").split_whitespace().collect()
}

/// Switch values after applying `overrides` to the defaults, in table order,
/// plus every line that could not be applied
pub fn merge(overrides: &str) -> (Vec<String>, Vec<Issue>) {
    let mut values: Vec<String> = SWITCHES.iter().map(|s| s.default.to_string()).collect();
    let mut issues = Vec::new();

    for (index, raw) in overrides.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") {
            continue;
        }
        let Some((name, ty, value)) = split_const(text) else {
            issues.push(Issue::Malformed { line });
            continue;
        };
        let Some(pos) = SWITCHES.iter().position(|s| s.name == name) else {
            issues.push(Issue::Unknown {
                line,
                name: name.to_string(),
            });
            continue;
        };
        let switch = &SWITCHES[pos];
        if normalize_type(ty) != normalize_type(switch.ty) {
            issues.push(Issue::WrongType {
                line,
                name: name.to_string(),
                expected: switch.ty,
                found: ty.to_string(),
            });
            continue;
        }
        values[pos] = value.to_string();
    }
    (values, issues)
}

/// Source of the generated `defaults` module
pub fn render(values: &[String], overridden: bool) -> String {
    let mut out = String::from("// Generated by build.rs from the switch table");
    if overridden {
        out.push_str(" and GCF_CONFIG_RS");
    }
    out.push_str("\n\n");
    for (switch, value) in SWITCHES.iter().zip(values) {
        out.push_str(&format!("pub const {}: {} = {};\n", switch.name, switch.ty, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(values: &[String], name: &str) -> String {
        let pos = SWITCHES.iter().position(|s| s.name == name).unwrap();
        values[pos].clone()
    }

    #[test]
    fn test_split_const() {
        assert_eq!(
            split_const("pub const LARGE_OBJECT_THRESHOLD: usize = 4096;"),
            Some(("LARGE_OBJECT_THRESHOLD", "usize", "4096"))
        );
        assert_eq!(
            split_const("pub const STACK_SIZE: usize = 2 * 1024 * 1024;"),
            Some(("STACK_SIZE", "usize", "2 * 1024 * 1024"))
        );
        assert_eq!(split_const("pub const MEMDEBUG: bool = true"), None);
        assert_eq!(split_const("const MEMDEBUG: bool = true;"), None);
    }

    #[test]
    fn test_merge_applies_overrides() {
        let file = r#"
            // debug build
            pub const MIGRATE_TASKS: bool = false;
            pub const COPY_STACKS: &'static str = "always";
        "#;
        let (values, issues) = merge(file);
        assert!(issues.is_empty(), "{:?}", issues);
        assert_eq!(value_of(&values, "MIGRATE_TASKS"), "false");
        assert_eq!(value_of(&values, "COPY_STACKS"), "\"always\"");
        assert_eq!(value_of(&values, "MEMDEBUG"), "false");
    }

    #[test]
    fn test_merge_reports_bad_lines() {
        let file = "pub const NOT_A_SWITCH: bool = true;\n\
                    pub const NUM_THREADS: bool = true;\n\
                    NUM_THREADS = 4\n";
        let (values, issues) = merge(file);
        assert_eq!(
            issues,
            vec![
                Issue::Unknown {
                    line: 1,
                    name: "NOT_A_SWITCH".into()
                },
                Issue::WrongType {
                    line: 2,
                    name: "NUM_THREADS".into(),
                    expected: "usize",
                    found: "bool".into()
                },
                Issue::Malformed { line: 3 },
            ]
        );
        assert_eq!(value_of(&values, "NUM_THREADS"), "1");
        assert_eq!(issues[1].to_string(), "line 2: NUM_THREADS is usize, not bool");
    }

    #[test]
    fn test_render_covers_every_switch() {
        let (values, _) = merge("");
        let out = render(&values, false);
        assert_eq!(out.matches("pub const ").count(), SWITCHES.len());
        assert!(out.contains("pub const NUM_THREADS: usize = 1;\n"));
        assert!(!out.contains("GCF_CONFIG_RS"));
    }
}
