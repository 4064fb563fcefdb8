//! LaTeX 本地语法检查、代码块提取与自动修复
//!
//! 五项相互独立的检查，每项最多给出一条诊断：
//! - 未闭合环境（`\begin{x}` 之后再没有 `\end{x}`）
//! - 未闭合数学模式（未转义的 `$` 个数为奇数）
//! - 未闭合左花括号（未转义的 `{` 多于与之配对的 `}`）
//! - 空引用 `\cite{}`
//! - 空交叉引用 `\ref{}`

use std::sync::OnceLock;

use regex::Regex;

static BEGIN_RE: OnceLock<Regex> = OnceLock::new();
static EMPTY_CITE_RE: OnceLock<Regex> = OnceLock::new();
static EMPTY_REF_RE: OnceLock<Regex> = OnceLock::new();
static FENCED_RE: OnceLock<[Regex; 3]> = OnceLock::new();

fn begin_re() -> &'static Regex {
    BEGIN_RE.get_or_init(|| Regex::new(r"\\begin\{([^}]+)\}").unwrap())
}

fn empty_cite_re() -> &'static Regex {
    EMPTY_CITE_RE.get_or_init(|| Regex::new(r"\\cite\{\s*\}").unwrap())
}

fn empty_ref_re() -> &'static Regex {
    EMPTY_REF_RE.get_or_init(|| Regex::new(r"\\ref\{\s*\}").unwrap())
}

/// 按优先级：```latex、```tex、任意语言标记的代码块
fn fenced_res() -> &'static [Regex; 3] {
    FENCED_RE.get_or_init(|| {
        [
            Regex::new(r"(?s)```latex\n(.*?)\n```").unwrap(),
            Regex::new(r"(?s)```tex\n(.*?)\n```").unwrap(),
            Regex::new(r"(?s)```[^\n]*\n(.*?)\n```").unwrap(),
        ]
    })
}

/// 第一个没有后续 `\end{name}` 的环境名
fn first_unclosed_environment(content: &str) -> Option<String> {
    begin_re().captures_iter(content).find_map(|cap| {
        let whole = cap.get(0)?;
        let name = cap.get(1)?.as_str();
        let closing = format!("\\end{{{name}}}");
        if content[whole.end()..].contains(&closing) {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// 逐字符扫描，跳过反斜杠转义的字符
fn unescaped_chars(content: &str) -> impl Iterator<Item = char> + '_ {
    let mut escaped = false;
    content.chars().filter(move |&c| {
        if escaped {
            escaped = false;
            return false;
        }
        if c == '\\' {
            escaped = true;
            return false;
        }
        true
    })
}

fn has_unclosed_math(content: &str) -> bool {
    unescaped_chars(content).filter(|&c| c == '$').count() % 2 == 1
}

fn has_unclosed_brace(content: &str) -> bool {
    let mut depth: usize = 0;
    for c in unescaped_chars(content) {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth > 0
}

/// 运行全部检查，返回诊断列表（无问题时为空）
pub fn check_syntax(content: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(env) = first_unclosed_environment(content) {
        errors.push(format!("Unclosed environment: {env}"));
    }
    if has_unclosed_math(content) {
        errors.push("Unclosed math mode".to_string());
    }
    if has_unclosed_brace(content) {
        errors.push("Unclosed brace".to_string());
    }
    if empty_cite_re().is_match(content) {
        errors.push("Empty citation".to_string());
    }
    if empty_ref_re().is_match(content) {
        errors.push("Empty reference".to_string());
    }
    errors
}

/// 从模型回复中取文档：优先 ```latex，其次 ```tex，再次任意 ``` 代码块，否则原文
pub fn extract_latex(response: &str) -> String {
    for re in fenced_res() {
        if let Some(cap) = re.captures(response) {
            if let Some(body) = cap.get(1) {
                return body.as_str().to_string();
            }
        }
    }
    response.to_string()
}

/// 尽力而为的自动修复：为没有后续 `\end{x}` 的环境，在下一个 `\begin{` 之前（或文末）补上 `\end{x}`
///
/// 返回修复后的文本与剩余诊断；与模型驱动的阶段图无关。
pub fn repair(content: &str) -> (String, Vec<String>) {
    if check_syntax(content).is_empty() {
        return (content.to_string(), Vec::new());
    }

    let begins: Vec<(usize, usize, String)> = begin_re()
        .captures_iter(content)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            Some((whole.start(), whole.end(), cap.get(1)?.as_str().to_string()))
        })
        .collect();

    let mut repaired = String::with_capacity(content.len() + 32);
    let mut cursor = 0;
    for (i, (_, end, name)) in begins.iter().enumerate() {
        let segment_end = begins.get(i + 1).map(|b| b.0).unwrap_or(content.len());
        let closing = format!("\\end{{{name}}}");
        if content[*end..].contains(&closing) {
            continue;
        }
        repaired.push_str(&content[cursor..segment_end]);
        if !repaired.ends_with('\n') {
            repaired.push('\n');
        }
        repaired.push_str(&closing);
        repaired.push('\n');
        cursor = segment_end;
    }
    repaired.push_str(&content[cursor..]);

    let remaining = check_syntax(&repaired);
    (repaired, remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_document_has_no_errors() {
        let doc = "\\documentclass{article}\n\\begin{document}\nEuler: $e^{i\\pi}+1=0$, see \\cite{euler1748} and \\ref{eq:1}.\n\\end{document}\n";
        assert!(check_syntax(doc).is_empty());
    }

    #[test]
    fn test_unclosed_itemize_is_single_diagnostic() {
        let doc = "\\begin{itemize}\n\\item one\n\\item two\n";
        assert_eq!(check_syntax(doc), vec!["Unclosed environment: itemize".to_string()]);
    }

    #[test]
    fn test_math_and_braces() {
        assert_eq!(check_syntax("cost is $x"), vec!["Unclosed math mode".to_string()]);
        assert!(check_syntax("price \\$5 and $y$").is_empty());
        assert_eq!(check_syntax("\\textbf{bold"), vec!["Unclosed brace".to_string()]);
        assert!(check_syntax("\\textbf{\\emph{nested}}").is_empty());
        assert!(check_syntax("literal \\{ brace").is_empty());
    }

    #[test]
    fn test_empty_cite_and_ref() {
        let errors = check_syntax("see \\cite{ } and \\ref{}");
        assert_eq!(
            errors,
            vec!["Empty citation".to_string(), "Empty reference".to_string()]
        );
    }

    #[test]
    fn test_extract_latex_preference_order() {
        let both = "x\n```tex\nTEX\n```\n```latex\nLATEX\n```";
        assert_eq!(extract_latex(both), "LATEX");
        assert_eq!(extract_latex("```tex\nTEX\n```"), "TEX");
        assert_eq!(extract_latex("```\nPLAIN\n```"), "PLAIN");
        assert_eq!(extract_latex("no fence"), "no fence");
    }

    #[test]
    fn test_repair_closes_environment() {
        let doc = "\\begin{itemize}\n\\item one\n";
        let (fixed, remaining) = repair(doc);
        assert!(fixed.ends_with("\\end{itemize}\n"));
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_repair_closes_before_next_begin() {
        let doc = "\\begin{quote}\nq\n\\begin{center}\nc\n\\end{center}\n";
        let (fixed, remaining) = repair(doc);
        assert_eq!(
            fixed,
            "\\begin{quote}\nq\n\\end{quote}\n\\begin{center}\nc\n\\end{center}\n"
        );
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_repair_leaves_other_errors() {
        let (fixed, remaining) = repair("ok \\cite{}");
        assert_eq!(fixed, "ok \\cite{}");
        assert_eq!(remaining, vec!["Empty citation".to_string()]);
    }
}
