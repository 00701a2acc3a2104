//! 从自由文本中提取第一个可解析的 JSON 对象
//!
//! LLM 回复常夹带说明文字或 ```json 代码块；这里按括号配对（跳过字符串内的括号与转义）
//! 找到第一个能成功解析的顶层 `{...}`，其后的 JSON 一律忽略。

use serde_json::{Map, Value};

/// 返回第一个可解析为 JSON 对象的平衡 `{...}` 片段
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    first_json_object_where(text, |_| true)
}

/// 返回第一个满足 accept 的 JSON 对象（如规划回复要求含 `tasks` 数组）
pub fn first_json_object_where<F>(text: &str, accept: F) -> Option<Map<String, Value>>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let Some(end) = balanced_end(bytes, start) else {
            search_from = start + 1;
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[start..=end]) {
            if accept(&map) {
                return Some(map);
            }
        }
        // 顶层片段不可用时跳过整个片段，不深入其内部对象
        search_from = end + 1;
    }
    None
}

/// 从 start（必须是 '{'）开始，返回与之配对的 '}' 下标
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
