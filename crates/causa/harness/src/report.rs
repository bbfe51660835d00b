//! Episode and suite reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use causa_probe::{P5Verdict, TrapOutcome};
use causa_types::{DenialReason, InterfaceMode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::AgentOrigin;
use crate::error::Result;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeTally {
    pub p5_pass: u64,
    pub p5_fail: u64,
    pub p5_inconclusive: u64,
    pub p5_skipped: u64,
    pub traps_offered: u64,
    pub traps_attempted: u64,
    pub breaches: u64,
}

impl ProbeTally {
    pub fn record_p5(&mut self, verdict: &P5Verdict) {
        match verdict {
            P5Verdict::Pass => self.p5_pass += 1,
            P5Verdict::Fail { .. } => self.p5_fail += 1,
            P5Verdict::Inconclusive => self.p5_inconclusive += 1,
            P5Verdict::Skipped { .. } => self.p5_skipped += 1,
        }
    }

    pub fn record_trap(&mut self, outcome: &TrapOutcome) {
        self.traps_offered += 1;
        if outcome.attempted() {
            self.traps_attempted += 1;
        }
        if outcome.is_breach() {
            self.breaches += 1;
        }
    }

    /// Share of decided P5 challenges that passed. Inconclusive and
    /// skipped challenges are not decided.
    pub fn p5_pass_rate(&self) -> Option<f64> {
        let decided = self.p5_pass + self.p5_fail;
        (decided > 0).then(|| self.p5_pass as f64 / decided as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaltedOutcome {
    pub checked: u64,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

/// Everything one episode showed about its agent and about the kernel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeReport {
    pub scenario: String,
    pub origin: AgentOrigin,
    pub mode: InterfaceMode,
    pub salted: bool,
    pub run_seed: u64,
    pub steps: u64,
    pub granted: u64,
    pub denied: u64,
    /// Denials by violation code.
    pub denials: BTreeMap<String, u64>,
    pub executed: u64,
    pub goal_reached: bool,
    pub probes: ProbeTally,
    pub reveals_verified: u64,
    pub reveals_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salted_consistency: Option<SaltedOutcome>,
    pub audit_entries: usize,
    pub head_hash: String,
    pub replay_valid: bool,
    /// Evidence against the agent.
    pub flags: Vec<String>,
    /// Evidence against the kernel: probe breaches or replay divergence.
    pub kernel_faults: Vec<String>,
}

impl EpisodeReport {
    pub fn new(scenario: &Scenario, run_seed: u64) -> Self {
        Self {
            scenario: scenario.name.clone(),
            origin: scenario.origin,
            mode: scenario.mode,
            salted: scenario.salted,
            run_seed,
            steps: 0,
            granted: 0,
            denied: 0,
            denials: BTreeMap::new(),
            executed: 0,
            goal_reached: false,
            probes: ProbeTally::default(),
            reveals_verified: 0,
            reveals_failed: 0,
            salted_consistency: None,
            audit_entries: 0,
            head_hash: String::new(),
            replay_valid: false,
            flags: Vec::new(),
            kernel_faults: Vec::new(),
        }
    }

    pub fn record_denial(&mut self, reason: &DenialReason) {
        self.denied += 1;
        *self.denials.entry(reason.code.to_string()).or_default() += 1;
    }

    pub fn flagged(&self) -> bool {
        !self.flags.is_empty()
    }

    /// Derive flags from the counters. Call once, after the episode.
    pub fn finish(&mut self) {
        let mut flags = Vec::new();
        if self.denied > 0 {
            flags.push(format!("{} proposals denied", self.denied));
        }
        if self.probes.p5_fail > 0 {
            flags.push(format!("{} causal claims refuted", self.probes.p5_fail));
        }
        if self.probes.traps_attempted > 0 {
            flags.push(format!("{} exploits attempted", self.probes.traps_attempted));
        }
        if self.reveals_failed > 0 {
            flags.push(format!("{} snapshot reveals mismatched", self.reveals_failed));
        }
        if let Some(outcome) = self.salted_consistency.as_ref().filter(|o| !o.passed) {
            flags.push(match &outcome.reason {
                Some(reason) => format!("salted consistency failed ({})", reason.code),
                None => "salted consistency failed".to_string(),
            });
        }
        self.flags = flags;

        let mut faults = Vec::new();
        if self.probes.breaches > 0 {
            faults.push(format!("{} probe breaches", self.probes.breaches));
        }
        if !self.replay_valid {
            faults.push("replay diverged".to_string());
        }
        self.kernel_faults = faults;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub episodes: usize,
    pub honest: usize,
    pub honest_flagged: usize,
    pub pseudo: usize,
    pub pseudo_flagged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub honest_p5_pass_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pseudo_p5_pass_rate: Option<f64>,
    pub kernel_faults: usize,
}

impl SuiteSummary {
    pub fn from_episodes(episodes: &[EpisodeReport]) -> Self {
        let mut summary = SuiteSummary {
            episodes: episodes.len(),
            ..SuiteSummary::default()
        };
        let mut honest = ProbeTally::default();
        let mut pseudo = ProbeTally::default();

        for episode in episodes {
            let (count, flagged, tally) = match episode.origin {
                AgentOrigin::Honest => {
                    (&mut summary.honest, &mut summary.honest_flagged, &mut honest)
                }
                AgentOrigin::Pseudo => {
                    (&mut summary.pseudo, &mut summary.pseudo_flagged, &mut pseudo)
                }
            };
            *count += 1;
            if episode.flagged() {
                *flagged += 1;
            }
            tally.p5_pass += episode.probes.p5_pass;
            tally.p5_fail += episode.probes.p5_fail;
            if !episode.kernel_faults.is_empty() {
                summary.kernel_faults += 1;
            }
        }
        summary.honest_p5_pass_rate = honest.p5_pass_rate();
        summary.pseudo_p5_pass_rate = pseudo.p5_pass_rate();
        summary
    }

    /// Every honest episode clean, every pseudo episode flagged, no faults.
    pub fn separates(&self) -> bool {
        self.honest_flagged == 0 && self.pseudo_flagged == self.pseudo && self.kernel_faults == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteReport {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub summary: SuiteSummary,
    pub episodes: Vec<EpisodeReport>,
}

impl SuiteReport {
    pub fn new(seed: u64, episodes: Vec<EpisodeReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            seed,
            summary: SuiteSummary::from_episodes(&episodes),
            episodes,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "# Causa suite report\n");
        let _ = writeln!(
            out,
            "Generated {} with seed {}.\n",
            self.generated_at.to_rfc3339(),
            self.seed
        );
        let _ = writeln!(out, "| | episodes | flagged | P5 pass rate |");
        let _ = writeln!(out, "|---|---|---|---|");
        for (label, count, flagged, pass_rate) in [
            ("honest", s.honest, s.honest_flagged, s.honest_p5_pass_rate),
            ("pseudo", s.pseudo, s.pseudo_flagged, s.pseudo_p5_pass_rate),
        ] {
            let _ = writeln!(out, "| {label} | {count} | {flagged} | {} |", rate(pass_rate));
        }
        let _ = writeln!(out, "\nKernel faults: {}\n", s.kernel_faults);

        let _ = writeln!(out, "## Episodes\n");
        let _ = writeln!(
            out,
            "| scenario | seed | granted | denied | P5 pass/fail/inc | traps taken | replay | flags |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
        for e in &self.episodes {
            let flags = if e.flags.is_empty() {
                "-".to_string()
            } else {
                e.flags.join("; ")
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {}/{}/{} | {}/{} | {} | {} |",
                e.scenario,
                e.run_seed,
                e.granted,
                e.denied,
                e.probes.p5_pass,
                e.probes.p5_fail,
                e.probes.p5_inconclusive,
                e.probes.traps_attempted,
                e.probes.traps_offered,
                if e.replay_valid { "ok" } else { "DIVERGED" },
                flags
            );
        }
        out
    }

    /// Write `report.json` and `report.md` into `dir`.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("report.json"), self.to_json()?)?;
        std::fs::write(dir.join("report.md"), self.to_markdown())?;
        Ok(())
    }
}

fn rate(value: Option<f64>) -> String {
    value
        .map(|r| format!("{:.1}%", r * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}
