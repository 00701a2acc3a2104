//! 样本量计算 Agent（data_analysis）
//!
//! 正态近似：z = z(1-α/2) + z(power)。
//! - two_group：每组 n = 2·z²/d²
//! - paired / one_sample：n = z²/d²
//!
//! 指令为自然语言，设计类型、效应量、α、power 均从文本中解析，缺省 two_group / 0.5 / 0.05 / 0.8。
//! 百分比效应（如 "30% reduction"）按标准化效应量 0.30 处理。

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::agents::{AgentResponse, Runnable};
use crate::core::AgentError;

pub const DEFAULT_EFFECT_SIZE: f64 = 0.5;
pub const DEFAULT_ALPHA: f64 = 0.05;
pub const DEFAULT_POWER: f64 = 0.8;

/// 单组样本量上限；超过即视为效应量不合理
pub const MAX_PARTICIPANTS: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyDesign {
    TwoGroup,
    Paired,
    OneSample,
}

impl StudyDesign {
    /// 从文本关键词推断设计类型
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        if ["paired", "crossover", "cross-over", "before-after", "pre-post"]
            .iter()
            .any(|k| lower.contains(k))
        {
            StudyDesign::Paired
        } else if ["one_sample", "one-sample", "one sample", "single-arm", "single arm"]
            .iter()
            .any(|k| lower.contains(k))
        {
            StudyDesign::OneSample
        } else {
            StudyDesign::TwoGroup
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StudyDesign::TwoGroup => "two_group",
            StudyDesign::Paired => "paired",
            StudyDesign::OneSample => "one_sample",
        }
    }
}

impl fmt::Display for StudyDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 样本量请求参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleSizeRequest {
    pub design: StudyDesign,
    pub effect_size: f64,
    pub alpha: f64,
    pub power: f64,
}

/// 计算结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleSizeEstimate {
    pub n_per_group: u64,
    pub total_n: u64,
}

struct Patterns {
    effect: Regex,
    percent_effect: Regex,
    alpha: Regex,
    power: Regex,
    power_percent: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        effect: Regex::new(r"(?i)effect[ _]size(?:\s+of|\s*[=:])?\s*(\d*\.?\d+)(\s*%)?")
            .expect("valid regex"),
        percent_effect: Regex::new(
            r"(?i)(\d+(?:\.\d+)?)\s*%\s*(?:relative\s+)?(?:reduction|increase|decrease|difference|change|improvement|effect)",
        )
        .expect("valid regex"),
        alpha: Regex::new(r"(?i)(?:alpha|significance(?: level)?)(?:\s+of|\s*[=:])?\s*(0?\.\d+)")
            .expect("valid regex"),
        power: Regex::new(r"(?i)power(?:\s+of|\s*[=:])?\s*(0?\.\d+|\d+(?:\.\d+)?\s*%)")
            .expect("valid regex"),
        power_percent: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*power").expect("valid regex"),
    })
}

fn parse_fraction(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    match raw.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
        None => raw.parse::<f64>().ok(),
    }
}

impl SampleSizeRequest {
    /// 从自然语言解析；未出现的参数取默认值
    pub fn parse(text: &str) -> Self {
        let p = patterns();

        let effect_size = p
            .effect
            .captures(text)
            .and_then(|c| {
                let v: f64 = c.get(1)?.as_str().parse().ok()?;
                Some(if c.get(2).is_some() { v / 100.0 } else { v })
            })
            .or_else(|| {
                p.percent_effect
                    .captures(text)
                    .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
                    .map(|v| v / 100.0)
            })
            .unwrap_or(DEFAULT_EFFECT_SIZE);

        let alpha = p
            .alpha
            .captures(text)
            .and_then(|c| parse_fraction(c.get(1)?.as_str()))
            .unwrap_or(DEFAULT_ALPHA);

        let power = p
            .power
            .captures(text)
            .and_then(|c| parse_fraction(c.get(1)?.as_str()))
            .or_else(|| {
                p.power_percent
                    .captures(text)
                    .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
                    .map(|v| v / 100.0)
            })
            .unwrap_or(DEFAULT_POWER);

        Self {
            design: StudyDesign::detect(text),
            effect_size,
            alpha,
            power,
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if !(self.effect_size > 0.0 && self.effect_size.is_finite()) {
            return Err(AgentError::InvalidInstruction(format!(
                "effect size must be positive, got {}",
                self.effect_size
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AgentError::InvalidInstruction(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.power > 0.0 && self.power < 1.0) {
            return Err(AgentError::InvalidInstruction(format!(
                "power must be in (0, 1), got {}",
                self.power
            )));
        }
        Ok(())
    }

    pub fn estimate(&self) -> Result<SampleSizeEstimate, AgentError> {
        self.validate()?;
        let z = inverse_normal_cdf(1.0 - self.alpha / 2.0) + inverse_normal_cdf(self.power);
        let base = (z * z) / (self.effect_size * self.effect_size);
        let (per_group, groups) = match self.design {
            StudyDesign::TwoGroup => ((2.0 * base).ceil(), 2u64),
            StudyDesign::Paired | StudyDesign::OneSample => (base.ceil(), 1u64),
        };
        if !per_group.is_finite() || per_group > MAX_PARTICIPANTS {
            return Err(AgentError::InvalidInstruction(format!(
                "effect size {} is too small: more than {} participants per group",
                self.effect_size, MAX_PARTICIPANTS
            )));
        }
        let n_per_group = per_group as u64;
        let total_n = n_per_group.checked_mul(groups).ok_or_else(|| {
            AgentError::InvalidInstruction(format!("sample size overflow for effect size {}", self.effect_size))
        })?;
        Ok(SampleSizeEstimate { n_per_group, total_n })
    }
}

/// 标准正态分布的分位数函数（Acklam 有理逼近，相对误差约 1e-9）
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inverse_normal_cdf(1.0 - p)
    }
}

/// 结果的自然语言描述
pub fn describe(request: &SampleSizeRequest, estimate: &SampleSizeEstimate) -> String {
    let power_pct = (request.power * 100.0).round();
    match request.design {
        StudyDesign::TwoGroup => format!(
            "A two-group comparison needs {} participants per group ({} total) to detect an effect size of {:.2} with alpha {} and {}% power.",
            estimate.n_per_group, estimate.total_n, request.effect_size, request.alpha, power_pct
        ),
        design => format!(
            "A {} design needs {} participants to detect an effect size of {:.2} with alpha {} and {}% power.",
            design.as_str().replace('_', "-"),
            estimate.total_n,
            request.effect_size,
            request.alpha,
            power_pct
        ),
    }
}

#[derive(Debug, Default)]
pub struct SampleSizeAgent;

#[async_trait]
impl Runnable for SampleSizeAgent {
    fn name(&self) -> &str {
        "data_analysis"
    }

    async fn run(&self, instruction: &str) -> Result<AgentResponse, AgentError> {
        let request = SampleSizeRequest::parse(instruction);
        let estimate = request.estimate()?;
        tracing::info!(
            design = %request.design,
            effect_size = request.effect_size,
            total_n = estimate.total_n,
            "sample size calculated"
        );
        Ok(AgentResponse::Structured(json!({
            "design": request.design,
            "effect_size": request.effect_size,
            "alpha": request.alpha,
            "power": request.power,
            "n_per_group": estimate.n_per_group,
            "total_n": estimate.total_n,
            "text": describe(&request, &estimate),
        })))
    }
}
