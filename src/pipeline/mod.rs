//! 规划 → 执行 → 综合 流水线
//!
//! - **task**: 计划数据模型（Task / ParamValue / ExecutionResult）
//! - **planner**: LLM 规划 + 关键词回退
//! - **resolver**: `<task_id.field>` 引用解析
//! - **executor**: 按顺序执行任务
//! - **synthesizer**: 结果汇总
//! - **suggestions**: 下一步建议

pub mod executor;
pub mod extract;
pub mod planner;
pub mod resolver;
pub mod suggestions;
pub mod synthesizer;
pub mod task;

pub use executor::{build_instruction, execute_plan, extract_output};
pub use extract::first_json_object;
pub use planner::{fallback_plan, parse_plan, Planner};
pub use resolver::{resolve, Resolution};
pub use suggestions::suggest;
pub use synthesizer::Synthesizer;
pub use task::{ExecutionResult, ParamValue, Params, PlanDocument, PlanResults, Task, TaskSpec};
