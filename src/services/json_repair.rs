//! JSON 修复工具
//!
//! 分类服务的回复经常不是严格 JSON：被 ``` 代码块包裹、对象末尾多逗号、
//! 用单引号、键名不加引号。这里先直接解析，失败后做一次文本修复再解析。

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fenced block pattern is valid")
});

/// 提取回复中的 JSON 主体
///
/// 优先取代码块内容；再截取第一个 `{` 到最后一个 `}` 之间的部分。
pub fn extract_json_block(content: &str) -> &str {
    let body = FENCED_BLOCK
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
        .trim();

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

/// 尽力修复常见的 JSON 格式问题
///
/// - 单引号字符串转为双引号字符串
/// - 删除 `}` / `]` 前的多余逗号
/// - 为未加引号的键名补上双引号
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                i = copy_string(&chars, i, '"', &mut out);
            }
            '\'' => {
                i = copy_string(&chars, i, '\'', &mut out);
            }
            ',' => {
                let next = next_significant(&chars, i + 1);
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if is_key_start(c) && expects_key(&out) => {
                let start = i;
                while i < chars.len() && is_key_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// 两次尝试解析：直接解析，失败后修复再解析
///
/// 两次都失败时返回第二次的错误。
pub fn parse_lenient<T: DeserializeOwned>(content: &str) -> Result<T, serde_json::Error> {
    let body = extract_json_block(content);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!("首次 JSON 解析失败，尝试修复: {}", first);
            serde_json::from_str(&repair_json(body))
        }
    }
}

/// 复制一个字符串字面量（输出统一为双引号），返回结束位置之后的下标
fn copy_string(chars: &[char], start: usize, quote: char, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            if quote == '\'' && escaped == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push('"');
            return i + 1;
        }
        if c == '"' {
            out.push_str("\\\"");
        } else {
            out.push(c);
        }
        i += 1;
    }
    i
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

/// 键名只可能出现在 `{` 或 `,` 之后
fn expects_key(out: &str) -> bool {
    matches!(out.trim_end().chars().last(), Some('{') | Some(','))
}

fn is_key_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
