//! Gate 3: lesson content.

use std::collections::HashMap;

use super::{GateConfig, GateResult, Violation, ViolationCode};
use crate::{ContentBlock, CurriculumStructure, LessonContent, LessonId, Stage};

/// Checks the full set of authored lessons against the curriculum.
///
/// The set of lesson ids must match the curriculum exactly (no omissions, no
/// duplicates, nothing extra) and appear in curriculum order; every lesson must
/// also pass [`check_lesson`].
pub fn check_content(
    curriculum: &CurriculumStructure,
    lessons: &[LessonContent],
    config: &GateConfig,
) -> GateResult {
    let mut violations = Vec::new();

    let mut seen: HashMap<&LessonId, usize> = HashMap::new();
    for (i, lesson) in lessons.iter().enumerate() {
        if let Some(first) = seen.insert(&lesson.lesson_id, i) {
            violations.push(Violation::new(
                ViolationCode::DuplicateId,
                format!("lessons[{i}]"),
                format!(
                    "lesson '{}' authored twice (first at lessons[{first}])",
                    lesson.lesson_id
                ),
            ));
        }
        if curriculum.lesson(&lesson.lesson_id).is_none() {
            violations.push(Violation::new(
                ViolationCode::UnexpectedLesson,
                format!("lessons[{i}]"),
                format!("lesson '{}' is not in the curriculum", lesson.lesson_id),
            ));
        }
    }

    let mut missing = false;
    for (_, outline) in curriculum.lessons() {
        if !seen.contains_key(&outline.id) {
            missing = true;
            violations.push(Violation::new(
                ViolationCode::MissingLesson,
                "lessons",
                format!("no content for lesson '{}'", outline.id),
            ));
        }
    }

    // Order only makes sense once the sets agree.
    if violations.is_empty() && !missing {
        let expected = curriculum.lessons().map(|(_, l)| &l.id);
        if let Some((i, (want, got))) = expected
            .zip(lessons.iter().map(|l| &l.lesson_id))
            .enumerate()
            .find(|(_, (want, got))| want != got)
        {
            violations.push(Violation::new(
                ViolationCode::LessonOrder,
                format!("lessons[{i}]"),
                format!("expected lesson '{want}' but found '{got}'"),
            ));
        }
    }

    for (i, lesson) in lessons.iter().enumerate() {
        violations.extend(lesson_violations(lesson, config, &format!("lessons[{i}]")));
    }

    GateResult::new(Stage::Content, violations)
}

/// Checks a single lesson: block schemas, code well-formedness, length floor.
///
/// Used by the content worker pool to validate each lesson as it is produced,
/// before the whole-stage check runs.
pub fn check_lesson(lesson: &LessonContent, config: &GateConfig) -> GateResult {
    GateResult::new(Stage::Content, lesson_violations(lesson, config, "lesson"))
}

fn lesson_violations(lesson: &LessonContent, config: &GateConfig, path: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    if lesson.blocks.is_empty() {
        violations.push(Violation::new(
            ViolationCode::EmptyField,
            format!("{path}.blocks"),
            format!("lesson '{}' has no content blocks", lesson.lesson_id),
        ));
    }

    for (b, block) in lesson.blocks.iter().enumerate() {
        let path = format!("{path}.blocks[{b}]");
        check_block(block, &path, &mut violations);
    }

    let chars = lesson.text_len();
    if chars < config.min_lesson_chars {
        violations.push(Violation::new(
            ViolationCode::ContentTooShort,
            path,
            format!(
                "lesson '{}' has {chars} characters of content; minimum is {}",
                lesson.lesson_id, config.min_lesson_chars
            ),
        ));
    }

    violations
}

fn check_block(block: &ContentBlock, path: &str, violations: &mut Vec<Violation>) {
    let mut problems: Vec<&str> = Vec::new();

    match block {
        ContentBlock::Text { body } => {
            if body.trim().is_empty() {
                problems.push("body must not be empty");
            }
        }
        ContentBlock::Code {
            language, source, ..
        } => {
            if language.trim().is_empty() {
                problems.push("language must not be empty");
            }
            if let Err(reason) = check_code_syntax(language, source) {
                violations.push(Violation::new(ViolationCode::MalformedCode, path, reason));
            }
        }
        ContentBlock::Exercise { prompt, hints, .. } => {
            if prompt.trim().is_empty() {
                problems.push("prompt must not be empty");
            }
            if hints.iter().any(|h| h.trim().is_empty()) {
                problems.push("hints must not be empty");
            }
        }
        ContentBlock::Media { url, .. } => {
            let url = url.trim();
            if url.is_empty() {
                problems.push("url must not be empty");
            } else if !(url.contains("://") || url.starts_with('/')) {
                problems.push("url must be absolute");
            }
        }
    }

    violations.extend(problems.into_iter().map(|message| {
        Violation::new(
            ViolationCode::InvalidBlock,
            path,
            format!("{} block: {message}", block.kind()),
        )
    }));
}

// ---------------------------------------------------------------------------
// Code well-formedness
// ---------------------------------------------------------------------------

/// Comment and string syntax for a language family.
struct Lexicon {
    line_comment: &'static [&'static str],
    block_comment: Option<(&'static str, &'static str)>,
    single_quote_strings: bool,
    /// `'x'` / `'\n'` are char literals; any other `'` (a Rust lifetime or
    /// label) is skipped on its own.
    char_literals: bool,
    triple_quote_strings: bool,
}

fn lexicon(language: &str) -> Lexicon {
    match language.trim().to_ascii_lowercase().as_str() {
        "python" | "py" => Lexicon {
            line_comment: &["#"],
            block_comment: None,
            single_quote_strings: true,
            char_literals: false,
            triple_quote_strings: true,
        },
        "ruby" | "rb" | "bash" | "sh" | "shell" | "zsh" | "yaml" | "yml" | "r" => Lexicon {
            line_comment: &["#"],
            block_comment: None,
            single_quote_strings: true,
            char_literals: false,
            triple_quote_strings: false,
        },
        "sql" | "lua" | "haskell" | "hs" => Lexicon {
            line_comment: &["--"],
            block_comment: Some(("/*", "*/")),
            single_quote_strings: true,
            char_literals: false,
            triple_quote_strings: false,
        },
        "javascript" | "js" | "typescript" | "ts" | "php" | "css" | "scss" => Lexicon {
            line_comment: &["//"],
            block_comment: Some(("/*", "*/")),
            single_quote_strings: true,
            char_literals: false,
            triple_quote_strings: false,
        },
        // Rust, C family, Go, Java, Kotlin, Swift... `'` opens a char literal
        // or a lifetime, never a string.
        _ => Lexicon {
            line_comment: &["//"],
            block_comment: Some(("/*", "*/")),
            single_quote_strings: false,
            char_literals: true,
            triple_quote_strings: false,
        },
    }
}

/// Lightweight, language-aware syntax check for code blocks.
///
/// The source must be non-blank, every `(`, `[` and `{` must be closed by its
/// matching delimiter, and string literals and block comments must be
/// terminated. Delimiters inside strings and comments are ignored.
pub fn check_code_syntax(language: &str, source: &str) -> Result<(), String> {
    if source.trim().is_empty() {
        return Err("code block is empty".into());
    }

    let lex = lexicon(language);
    let chars: Vec<char> = source.chars().collect();
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    let starts_with = |at: usize, token: &str| -> bool {
        token
            .chars()
            .enumerate()
            .all(|(k, c)| chars.get(at + k) == Some(&c))
    };

    while i < chars.len() {
        let c = chars[i];

        if let Some(token) = lex.line_comment.iter().find(|t| starts_with(i, **t)) {
            i += token.chars().count();
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if let Some((start, end)) = lex.block_comment {
            if starts_with(i, start) {
                let opened_at = line;
                i += start.chars().count();
                loop {
                    if i >= chars.len() {
                        return Err(format!("unterminated block comment opened on line {opened_at}"));
                    }
                    if starts_with(i, end) {
                        i += end.chars().count();
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                continue;
            }
        }

        if c == '\'' && lex.char_literals {
            i = skip_char_literal(&chars, i);
            continue;
        }

        let is_quote = c == '"' || c == '`' || (c == '\'' && lex.single_quote_strings);
        if is_quote {
            let opened_at = line;
            let triple: String = std::iter::repeat(c).take(3).collect();
            if lex.triple_quote_strings && starts_with(i, triple.as_str()) {
                i += 3;
                loop {
                    if i >= chars.len() {
                        return Err(format!("unterminated string opened on line {opened_at}"));
                    }
                    if starts_with(i, triple.as_str()) {
                        i += 3;
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                continue;
            }

            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(format!("unterminated string opened on line {opened_at}")),
                    Some('\\') => i += 2,
                    Some('\n') if c != '`' => {
                        return Err(format!("unterminated string opened on line {opened_at}"))
                    }
                    Some(&ch) if ch == c => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        if ch == '\n' {
                            line += 1;
                        }
                        i += 1;
                    }
                }
            }
            continue;
        }

        match c {
            '(' | '[' | '{' => open.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match open.pop() {
                    Some((opener, _)) if opener == expected => {}
                    Some((opener, opened_line)) => {
                        return Err(format!(
                            "'{c}' on line {line} does not close '{opener}' from line {opened_line}"
                        ))
                    }
                    None => return Err(format!("unmatched '{c}' on line {line}")),
                }
            }
            '\n' => line += 1,
            _ => {}
        }
        i += 1;
    }

    match open.pop() {
        Some((opener, opened_line)) => Err(format!("'{opener}' from line {opened_line} is never closed")),
        None => Ok(()),
    }
}

/// Index just past the char literal opening at `start`, or just past the
/// lone quote when it opens a lifetime or label instead.
fn skip_char_literal(chars: &[char], start: usize) -> usize {
    match chars.get(start + 1) {
        // Escapes: '\n', '\'', '\x41', '\u{1F600}'.
        Some('\\') => {
            let mut j = start + 3;
            while j < chars.len() && j <= start + 12 {
                match chars[j] {
                    '\'' => return j + 1,
                    '\n' => break,
                    _ => j += 1,
                }
            }
            start + 1
        }
        Some(&ch) if ch != '\n' && chars.get(start + 2) == Some(&'\'') => start + 3,
        _ => start + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::fixtures::{curriculum, lesson, lessons_for};

    fn codes(result: &GateResult) -> Vec<ViolationCode> {
        result.violations.iter().map(|v| v.code).collect()
    }

    #[test]
    fn complete_ordered_content_passes() {
        let c = curriculum(4, 3);
        let result = check_content(&c, &lessons_for(&c), &GateConfig::default());
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn omissions_and_duplicates_are_rejected() {
        let c = curriculum(3, 2);
        let mut lessons = lessons_for(&c);
        let dup = lessons[0].clone();
        lessons[5] = dup;
        let result = check_content(&c, &lessons, &GateConfig::default());
        assert_eq!(
            codes(&result),
            vec![ViolationCode::DuplicateId, ViolationCode::MissingLesson]
        );
    }

    #[test]
    fn extra_lessons_are_rejected() {
        let c = curriculum(3, 2);
        let mut lessons = lessons_for(&c);
        lessons.push(lesson(LessonId::new("stray").unwrap()));
        let result = check_content(&c, &lessons, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::UnexpectedLesson]);
    }

    #[test]
    fn lessons_must_follow_curriculum_order() {
        let c = curriculum(3, 2);
        let mut lessons = lessons_for(&c);
        lessons.swap(1, 2);
        let result = check_content(&c, &lessons, &GateConfig::default());
        assert_eq!(codes(&result), vec![ViolationCode::LessonOrder]);
        assert_eq!(result.violations[0].path, "lessons[1]");
    }

    #[test]
    fn short_lesson_fails_length_floor() {
        let thin = LessonContent {
            lesson_id: LessonId::new("l").unwrap(),
            blocks: vec![ContentBlock::Text { body: "Too short.".into() }],
        };
        assert_eq!(
            codes(&check_lesson(&thin, &GateConfig::default())),
            vec![ViolationCode::ContentTooShort]
        );
    }

    #[test]
    fn block_schemas_are_enforced() {
        let mut l = lesson(LessonId::new("l").unwrap());
        l.blocks.push(ContentBlock::Media {
            kind: crate::MediaKind::Image,
            url: "diagram.png".into(),
            caption: None,
        });
        l.blocks.push(ContentBlock::Exercise {
            prompt: " ".into(),
            hints: vec![],
            solution: None,
        });
        assert_eq!(
            codes(&check_lesson(&l, &GateConfig::default())),
            vec![ViolationCode::InvalidBlock, ViolationCode::InvalidBlock]
        );
    }

    #[test]
    fn balanced_code_passes() {
        assert!(check_code_syntax("python", "def f(x):\n    return [x, {'a': (1, 2)}]\n").is_ok());
        assert!(check_code_syntax("rust", "fn f<'a>(s: &'a str) -> &'a str { s }").is_ok());
        assert!(check_code_syntax("javascript", "const s = ')'; // (\nf(s);").is_ok());
        assert!(check_code_syntax("python", "\"\"\"doc ( \n\"\"\"\nx = 1").is_ok());
    }

    #[test]
    fn char_literals_do_not_count_as_delimiters() {
        assert_eq!(
            check_code_syntax("rust", "fn is_open(c: char) -> bool { c == '(' }"),
            Ok(())
        );
        assert_eq!(
            check_code_syntax("c", "int q(char c) { return c == '\"'; }"),
            Ok(())
        );
        assert_eq!(
            check_code_syntax("java", "char q = '\\''; int[] a = { q };"),
            Ok(())
        );
        assert_eq!(
            check_code_syntax("cpp", "char c = '\\x7b'; if (c == '}') { }"),
            Ok(())
        );
        assert_eq!(check_code_syntax("rust", "fn f<'a>(x: &'a str) {}"), Ok(()));
        assert_eq!(
            check_code_syntax("rust", "'outer: loop { let b = ['[', ']']; break 'outer; }"),
            Ok(())
        );
    }

    #[test]
    fn char_literal_does_not_hide_real_imbalance() {
        assert!(check_code_syntax("rust", "fn f(c: char) { c == ')' ").is_err());
        assert!(check_code_syntax("csharp", "var s = \"'(\";\nif (x {").is_err());
    }

    #[test]
    fn malformed_code_is_reported_with_line() {
        let err = check_code_syntax("python", "def f(x:\n    return x\n").unwrap_err();
        assert!(err.contains("line 1"), "{err}");
        assert!(check_code_syntax("rust", "fn main() { let v = vec![1, 2); }").is_err());
        assert!(check_code_syntax("js", "let s = \"open;\nf();").is_err());
        assert!(check_code_syntax("c", "/* never closed").is_err());
        assert!(check_code_syntax("go", "   ").is_err());
    }
}
