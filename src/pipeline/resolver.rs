//! 依赖解析：把参数中的引用替换为前序任务的输出
//!
//! 纯函数，不做数值计算。找不到任务（或任务无输出）时保留原占位符字符串，
//! 任务存在但字段缺失时替换为 null；两种情况都记入 unresolved，由调用方告警。

use serde_json::{Map, Value};

use crate::pipeline::{ParamValue, Params, PlanResults};

/// 解析结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub values: Map<String, Value>,
    /// 未能解析的占位符（原文）
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub fn resolve(params: &Params, prior_results: &PlanResults) -> Resolution {
    let mut resolution = Resolution::default();
    for (key, value) in params.iter() {
        let resolved = match value {
            ParamValue::Literal(v) => v.clone(),
            ParamValue::Reference { task_id, path } => {
                match resolve_reference(task_id, path, prior_results) {
                    Lookup::Found(v) => v,
                    Lookup::MissingField => {
                        resolution.unresolved.push(value.placeholder());
                        Value::Null
                    }
                    Lookup::MissingTask => {
                        resolution.unresolved.push(value.placeholder());
                        Value::String(value.placeholder())
                    }
                }
            }
        };
        resolution.values.insert(key.clone(), resolved);
    }
    resolution
}

enum Lookup {
    Found(Value),
    MissingField,
    MissingTask,
}

fn resolve_reference(task_id: &str, path: &[String], results: &PlanResults) -> Lookup {
    let Some(output) = results.get(task_id).and_then(|r| r.output.as_ref()) else {
        return Lookup::MissingTask;
    };
    let mut current = match path.split_first() {
        None => return Lookup::Found(Value::Object(output.clone())),
        Some((first, _)) => match output.get(first) {
            Some(v) => v,
            None => return Lookup::MissingField,
        },
    };
    for segment in &path[1..] {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Lookup::MissingField,
        }
    }
    Lookup::Found(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecutionResult;
    use serde_json::json;

    fn results_with(task_id: &str, output: Value) -> PlanResults {
        let mut results = PlanResults::new();
        let Value::Object(map) = output else {
            panic!("output must be an object")
        };
        results.insert(task_id, ExecutionResult::succeeded("agent", "action", map));
        results
    }

    #[test]
    fn test_resolves_dotted_path() {
        let results = results_with("task_1", json!({"a": {"b": 5}}));
        let params = Params::new().with("x", "<task_1.a.b>");
        let r = resolve(&params, &results);
        assert_eq!(Value::Object(r.values.clone()), json!({"x": 5}));
        assert!(r.is_complete());
    }

    #[test]
    fn test_missing_task_keeps_literal() {
        let params = Params::new().with("x", "<task_9.y>");
        let r = resolve(&params, &PlanResults::new());
        assert_eq!(Value::Object(r.values), json!({"x": "<task_9.y>"}));
        assert_eq!(r.unresolved, vec!["<task_9.y>".to_string()]);
    }

    #[test]
    fn test_failed_task_without_output_keeps_literal() {
        let mut results = PlanResults::new();
        results.insert("task_1", ExecutionResult::failed("a", "b", "boom"));
        let params = Params::new().with("q", "<task_1.search_query>");
        let r = resolve(&params, &results);
        assert_eq!(r.values["q"], json!("<task_1.search_query>"));
    }

    #[test]
    fn test_identity_without_placeholders() {
        let params = Params::new()
            .with("topic", "sepsis")
            .with("n", 3)
            .with("nested", json!({"k": "<not at top level>"}))
            .with("sentence", "value <task_1.x> inline");
        let r = resolve(&params, &results_with("task_1", json!({"x": 1})));
        assert_eq!(r.values, params.to_map());
        assert!(r.is_complete());
    }

    #[test]
    fn test_whole_output_reference() {
        let results = results_with("task_1", json!({"population": "adults", "search_query": "q"}));
        let params = Params::new().with("picot", "<task_1>");
        let r = resolve(&params, &results);
        assert_eq!(r.values["picot"], json!({"population": "adults", "search_query": "q"}));
    }

    #[test]
    fn test_array_index_segment() {
        let results = results_with("t", json!({"articles": [{"pmid": "1"}, {"pmid": "2"}]}));
        let params = Params::new().with("id", "<t.articles.1.pmid>");
        assert_eq!(resolve(&params, &results).values["id"], json!("2"));
    }

    #[test]
    fn test_missing_field_resolves_to_null() {
        let results = results_with("task_1", json!({"a": {}}));
        let params = Params::new().with("x", "<task_1.a.b>");
        let r = resolve(&params, &results);
        assert_eq!(r.values["x"], Value::Null);
        assert_eq!(r.unresolved.len(), 1);
    }
}
