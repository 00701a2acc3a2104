//! 计划数据模型：Task、ParamValue、ExecutionResult
//!
//! 占位符 `<task_id.a.b>` / `<task_id>` 在构造计划时一次性解析为 ParamValue::Reference，
//! 执行阶段不再重复解析字符串。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// 参数值：字面量或对前序任务输出的引用
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    Reference { task_id: String, path: Vec<String> },
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<([^<>\s]+)>$").expect("valid placeholder regex"))
}

impl ParamValue {
    /// 字符串恰好形如 `<...>` 时解析为引用，其余为字面量
    pub fn from_json(value: Value) -> Self {
        if let Value::String(s) = &value {
            if let Some(reference) = Self::parse_reference(s) {
                return reference;
            }
        }
        ParamValue::Literal(value)
    }

    pub fn parse_reference(s: &str) -> Option<Self> {
        let inner = placeholder_re().captures(s)?.get(1)?.as_str();
        let (task_id, path) = match inner.split_once('.') {
            Some((id, rest)) => (
                id.to_string(),
                rest.split('.').map(String::from).collect::<Vec<_>>(),
            ),
            None => (inner.to_string(), Vec::new()),
        };
        Some(ParamValue::Reference { task_id, path })
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    /// 还原为 JSON（引用还原为占位符字符串）
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Literal(v) => v.clone(),
            ParamValue::Reference { .. } => Value::String(self.placeholder()),
        }
    }

    /// 引用的原始占位符文本；字面量返回空串
    pub fn placeholder(&self) -> String {
        match self {
            ParamValue::Literal(_) => String::new(),
            ParamValue::Reference { task_id, path } if path.is_empty() => format!("<{task_id}>"),
            ParamValue::Reference { task_id, path } => format!("<{task_id}.{}>", path.join(".")),
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ParamValue::from_json)
    }
}

/// 有序参数表（保持插入顺序，用于生成 "k=v, k=v" 指令）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(k, v)| (k, ParamValue::from_json(v)))
                .collect(),
        )
    }

    /// 同名 key 覆盖原值并保持原位置
    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, ParamValue::from_json(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|(_, v)| match v {
            ParamValue::Reference { task_id, .. } => Some(task_id.as_str()),
            ParamValue::Literal(_) => None,
        })
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Params::from_map)
    }
}

/// 计划中的一个任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent_name: String,
    pub action: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, agent_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            action: action.into(),
            params: Params::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}.{}", self.task_id, self.agent_name, self.action)?;
        if !self.depends_on.is_empty() {
            write!(f, " (after {})", self.depends_on.join(", "))?;
        }
        Ok(())
    }
}

/// LLM 规划回复的 JSON 形状；所有字段可缺省，由 Planner 补默认值
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct PlanDocument {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TaskSpec {
    pub task_id: Option<String>,
    pub agent_name: Option<String>,
    pub action: Option<String>,
    /// 参数值可写 "<task_id.field>" 引用前序任务输出
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// 单个任务的执行结果；插入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub agent: String,
    pub action: String,
    pub output: Option<Map<String, Value>>,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded(agent: &str, action: &str, output: Map<String, Value>) -> Self {
        Self {
            agent: agent.to_string(),
            action: action.to_string(),
            output: Some(output),
            success: true,
            error: None,
        }
    }

    pub fn failed(agent: &str, action: &str, error: impl Into<String>) -> Self {
        Self {
            agent: agent.to_string(),
            action: action.to_string(),
            output: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 一轮执行的结果表：task_id → ExecutionResult，保持执行顺序
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanResults(Vec<(String, ExecutionResult)>);

impl PlanResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一 task_id 只保留首个结果
    pub fn insert(&mut self, task_id: impl Into<String>, result: ExecutionResult) {
        let task_id = task_id.into();
        if self.get(&task_id).is_some() {
            tracing::warn!(task_id = %task_id, "duplicate task id, keeping first result");
            return;
        }
        self.0.push((task_id, result));
    }

    pub fn get(&self, task_id: &str) -> Option<&ExecutionResult> {
        self.0.iter().find(|(id, _)| id == task_id).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionResult)> {
        self.0.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 非空且全部失败
    pub fn all_failed(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|(_, r)| !r.success)
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &ExecutionResult)> {
        self.iter().filter(|(_, r)| r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reference_with_path() {
        let v = ParamValue::from_json(json!("<task_1.a.b>"));
        assert_eq!(
            v,
            ParamValue::Reference {
                task_id: "task_1".into(),
                path: vec!["a".into(), "b".into()],
            }
        );
        assert_eq!(v.placeholder(), "<task_1.a.b>");
    }

    #[test]
    fn test_parse_whole_output_reference() {
        let v = ParamValue::from_json(json!("<task_2>"));
        assert_eq!(
            v,
            ParamValue::Reference {
                task_id: "task_2".into(),
                path: vec![],
            }
        );
    }

    #[test]
    fn test_non_exact_placeholder_is_literal() {
        for s in ["see <task_1.x> here", "<task 1>", "<>", "task_1.x", "<<task_1>>"] {
            assert!(matches!(ParamValue::from_json(json!(s)), ParamValue::Literal(_)), "{s}");
        }
        assert!(matches!(ParamValue::from_json(json!(5)), ParamValue::Literal(_)));
    }

    #[test]
    fn test_params_keep_insertion_order() {
        let params = Params::new()
            .with("zeta", "z")
            .with("alpha", 1)
            .with("query", "<task_1.search_query>");
        let keys: Vec<_> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "query"]);
        assert_eq!(params.references().collect::<Vec<_>>(), vec!["task_1"]);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["query"], json!("<task_1.search_query>"));
    }

    #[test]
    fn test_plan_results_all_failed() {
        let mut results = PlanResults::new();
        assert!(!results.all_failed());
        results.insert("t1", ExecutionResult::failed("a", "x", "boom"));
        assert!(results.all_failed());
        results.insert("t2", ExecutionResult::succeeded("a", "y", Map::new()));
        assert!(!results.all_failed());
        assert_eq!(results.successes().count(), 1);
    }
}
