//! Display metadata guessed from a prompt and the code generated for it.
//!
//! Every check is a case-insensitive substring test; the first matching rule
//! wins for single-valued guesses.

pub const DEFAULT_FRAMEWORK: &str = "react";
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// Lower-cased prompt and code, computed once per extraction.
struct Haystack {
    prompt: String,
    code: String,
}

impl Haystack {
    fn new(prompt: &str, code: &str) -> Self {
        Self {
            prompt: prompt.to_lowercase(),
            code: code.to_lowercase(),
        }
    }

    fn prompt_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.prompt.contains(n))
    }

    fn code_has(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.code.contains(n))
    }
}

/// (framework, prompt needles, code needles)
const FRAMEWORK_RULES: &[(&str, &[&str], &[&str])] = &[
    ("react", &["react"], &["react", "jsx"]),
    ("nextjs", &["next.js", "nextjs"], &["next"]),
    ("vue", &["vue"], &["vue"]),
    ("angular", &["angular"], &["angular"]),
    ("express", &["express"], &["express"]),
    ("django", &["django"], &["django"]),
    ("flask", &["flask"], &["flask"]),
    ("laravel", &["laravel"], &["laravel"]),
    ("spring", &["spring"], &["spring"]),
    ("fastapi", &["fastapi"], &["fastapi"]),
];

/// (tag, prompt needles, code needles)
const TAG_RULES: &[(&str, &[&str], &[&str])] = &[
    ("api", &["api"], &["fetch", "axios"]),
    ("database", &["database", "db"], &["mongodb", "sql"]),
    ("authentication", &["authentication", "auth"], &["login", "jwt"]),
    ("ui", &["ui", "interface", "component"], &[]),
    ("responsive", &["responsive", "mobile"], &[]),
    ("animation", &["animation"], &["animation", "transition"]),
    ("form", &["form"], &["form", "input"]),
    ("todo", &["todo", "task"], &[]),
    ("ecommerce", &["ecommerce", "shop"], &[]),
    ("blog", &["blog", "cms"], &[]),
];

/// Guesses the framework the generated code targets. Defaults to `react`.
pub fn extract_framework(prompt: &str, code: &str) -> &'static str {
    let hay = Haystack::new(prompt, code);
    FRAMEWORK_RULES
        .iter()
        .find(|(_, p, c)| hay.prompt_has(p) || hay.code_has(c))
        .map(|(name, _, _)| *name)
        .unwrap_or(DEFAULT_FRAMEWORK)
}

/// Topic tags, in rule order, each at most once.
pub fn extract_tags(prompt: &str, code: &str) -> Vec<String> {
    let hay = Haystack::new(prompt, code);
    TAG_RULES
        .iter()
        .filter(|(_, p, c)| hay.prompt_has(p) || hay.code_has(c))
        .map(|(tag, _, _)| (*tag).to_string())
        .collect()
}

/// Guesses the main language of the generated code. Defaults to `javascript`.
///
/// The code-side checks run against lower-cased text, so mixed-case markers
/// such as `using System` are matched in lower case.
pub fn extract_language(prompt: &str, code: &str) -> &'static str {
    let hay = Haystack::new(prompt, code);
    let both = |p: &[&str], c: &[&str]| hay.prompt_has(p) || hay.code_has(c);

    if both(&["python"], &["def ", "import "]) {
        "python"
    } else if both(&["javascript", "js"], &["function ", "const "]) {
        "javascript"
    } else if both(&["typescript", "ts"], &[": string", ": number"]) {
        "typescript"
    } else if both(&["react"], &["jsx", "react"]) {
        "javascript"
    } else if both(&["html"], &["<!doctype", "<html"]) {
        "html"
    } else if hay.prompt_has(&["css"]) || (hay.code.contains('{') && hay.code.contains(':')) {
        "css"
    } else if both(&["java"], &["public class"]) {
        "java"
    } else if both(&["c++"], &["#include"]) {
        "cpp"
    } else if both(&["c#"], &["using system"]) {
        "csharp"
    } else if both(&["php"], &["<?php"]) {
        "php"
    } else if hay.prompt_has(&["ruby"]) || (hay.code.contains("def ") && hay.code.contains("end"))
    {
        "ruby"
    } else if both(&["go"], &["package main"]) {
        "go"
    } else if both(&["rust"], &["fn "]) {
        "rust"
    } else if both(&["swift"], &["import swift"]) {
        "swift"
    } else if both(&["kotlin"], &["fun "]) {
        "kotlin"
    } else {
        DEFAULT_LANGUAGE
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(code: &str) -> i64 {
    code.chars().count().div_ceil(4) as i64
}
