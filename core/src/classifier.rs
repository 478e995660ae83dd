use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowType;

/// Task complexity lattice, ordered from trivial to epic.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// < 5 min (typo fixes, doc updates)
    Trivial,
    /// 15-30 min (single file changes)
    Simple,
    /// 1-2 hours (multiple files, tests)
    Moderate,
    /// 4-8 hours (new feature, refactor)
    Complex,
    /// 2-5 days (major feature, architecture)
    Epic,
}

impl Complexity {
    /// Human-readable duration estimate
    pub fn estimated_duration(self) -> &'static str {
        match self {
            Complexity::Trivial => "< 5 minutes",
            Complexity::Simple => "15-30 minutes",
            Complexity::Moderate => "1-2 hours",
            Complexity::Complex => "4-8 hours",
            Complexity::Epic => "2-5 days",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Epic => "epic",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain categories for recipe and skill matching.
///
/// Declaration order is the tie-break order: when two domains score equally,
/// the one declared first wins.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    WebDev,
    AiMl,
    Database,
    Devops,
    Testing,
    Documentation,
    Architecture,
    Security,
    Performance,
    General,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::WebDev => "web-dev",
            Domain::AiMl => "ai-ml",
            Domain::Database => "database",
            Domain::Devops => "devops",
            Domain::Testing => "testing",
            Domain::Documentation => "documentation",
            Domain::Architecture => "architecture",
            Domain::Security => "security",
            Domain::Performance => "performance",
            Domain::General => "general",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capabilities a task requires from its executing agent
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySet {
    /// Long-running execution without holding a session open
    #[serde(rename = "async")]
    pub async_execution: bool,
    /// Interactive plan approval before changes land
    pub plan_approval: bool,
    /// Access to the full repository context
    pub full_context: bool,
}

/// Result of classifying a free-text task prompt.
///
/// Pure data: classification is deterministic, does no I/O, and does not
/// depend on process locale. The same prompt always produces the same
/// classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub complexity: Complexity,
    pub domain: Domain,
    pub workflow_type: WorkflowType,
    pub required_capabilities: CapabilitySet,
    pub est_context_lines: u32,
    /// In [0, 1]
    pub confidence: f64,
    pub reasoning: String,
}

/// Full workflow recommendation: classification plus recipe and skills.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRecommendation {
    #[serde(flatten)]
    pub classification: Classification,
    pub recipe_id: String,
    pub required_skills: Vec<String>,
    pub estimated_duration: String,
    /// `start_workflow`, `research_skills`, or `clarify_requirements`
    pub next_action: String,
}

// Static, case-folded keyword tables. Matching is plain substring search
// over the lowercased prompt, so multi-word phrases match across spaces.

const EPIC_KEYWORDS: &[&str] = &[
    "architecture",
    "system",
    "migration",
    "redesign",
    "restructure",
    "complete rewrite",
    "platform",
    "infrastructure",
    "enterprise",
    "scalability",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "feature",
    "module",
    "integration",
    "api",
    "database",
    "authentication",
    "authorization",
    "security",
    "complex",
    "microservices",
    "distributed",
    "concurrent",
];

const MODERATE_KEYWORDS: &[&str] = &[
    "test",
    "testing",
    "documentation",
    "config",
    "settings",
    "validation",
    "error handling",
    "logging",
    "monitoring",
    "deployment",
    "docker",
    "kubernetes",
];

const SIMPLE_KEYWORDS: &[&str] = &[
    "fix", "bug", "typo", "comment", "readme", "update", "change", "modify",
];

const HIGH_COMPLEXITY_TECH: &[&str] = &[
    "kubernetes",
    "microservices",
    "graphql",
    "blockchain",
    "machine learning",
    "neural",
    "tensorflow",
    "pytorch",
    "cuda",
    "distributed computing",
];

const MEDIUM_COMPLEXITY_TECH: &[&str] = &[
    "react",
    "vue",
    "angular",
    "typescript",
    "webpack",
    "database",
    "sql",
    "redis",
    "mongodb",
    "authentication",
    "oauth",
    "jwt",
    "encryption",
];

const BROAD_SCOPE: &[&str] = &[
    "all files",
    "entire project",
    "entire system",
    "whole system",
    "every component",
    "all modules",
    "system-wide",
    "system wide",
    "across the application",
    "end to end",
    "end-to-end",
];

const MEDIUM_SCOPE: &[&str] = &[
    "multiple files",
    "several components",
    "various modules",
    "several areas",
];

const APPROVAL_KEYWORDS: &[&str] = &[
    "approval",
    "needs review",
    "design review",
    "architectural review",
    "stakeholder",
    "business requirements",
    "high impact",
    "breaking change",
];

const HIGH_RISK_PATTERNS: &[&str] = &[
    "delete data",
    "drop table",
    "remove feature",
    "breaking change",
    "major version",
    "api change",
];

const HOTFIX_KEYWORDS: &[&str] = &[
    "production down",
    "critical bug",
    "security issue",
    "data loss",
    "outage",
    "broken prod",
];

const RESEARCH_KEYWORDS: &[&str] = &[
    "research",
    "investigate",
    "analyze",
    "explore",
    "compare",
    "evaluate",
    "what is",
    "how does",
    "best way",
];

const DOCUMENTATION_KEYWORDS: &[&str] = &[
    "document",
    "write spec",
    "create guide",
    "add docs",
    "explain",
    "tutorial",
    "readme",
    "api docs",
];

const QUICK_FIX_KEYWORDS: &[&str] = &[
    "quick",
    "urgent",
    "emergency",
    "asap",
    "bug fix",
    "broken",
    "not working",
    "crash",
];

const REFACTOR_KEYWORDS: &[&str] = &[
    "refactor",
    "clean up",
    "improve",
    "optimize",
    "restructure",
    "modernize",
    "technical debt",
    "code quality",
];

/// Domain keyword tables, in tie-break order
const DOMAIN_TABLE: &[(Domain, &[&str])] = &[
    (
        Domain::WebDev,
        &[
            "react", "vue", "angular", "frontend", "ui", "component", "html", "css",
            "javascript", "typescript", "dom",
        ],
    ),
    (
        Domain::AiMl,
        &[
            "machine learning",
            "neural",
            "model",
            "training",
            "llm",
            "embedding",
            "vector",
            "prompt engineering",
        ],
    ),
    (
        Domain::Database,
        &[
            "database", "sql", "nosql", "redis", "postgres", "mongo", "query", "schema",
            "orm", "index",
        ],
    ),
    (
        Domain::Devops,
        &[
            "deploy",
            "ci/cd",
            "docker",
            "kubernetes",
            "aws",
            "azure",
            "pipeline",
            "infrastructure",
            "terraform",
            "helm",
        ],
    ),
    (
        Domain::Testing,
        &[
            "test", "unit test", "integration test", "e2e", "mock", "coverage", "qa",
        ],
    ),
    (
        Domain::Documentation,
        &[
            "docs",
            "documentation",
            "spec",
            "guide",
            "tutorial",
            "readme",
            "changelog",
            "api docs",
        ],
    ),
    (
        Domain::Architecture,
        &[
            "architecture",
            "design pattern",
            "hexagonal",
            "clean arch",
            "microservices",
            "event-driven",
            "ddd",
            "ports and adapters",
        ],
    ),
    (
        Domain::Security,
        &[
            "security",
            "auth",
            "authentication",
            "authorization",
            "oauth",
            "jwt",
            "encryption",
            "vulnerability",
        ],
    ),
    (
        Domain::Performance,
        &[
            "performance",
            "optimize",
            "slow",
            "latency",
            "throughput",
            "cache",
            "scale",
            "bottleneck",
            "profiling",
        ],
    ),
];

/// Recipe recommendation per domain; domain-independent overrides apply first
const RECIPE_BY_DOMAIN: &[(Domain, &str)] = &[
    (Domain::Documentation, "documentation-writer"),
    (Domain::WebDev, "ai-engineer"),
    (Domain::AiMl, "ai-engineer"),
    (Domain::Database, "ai-engineer"),
    (Domain::Devops, "ai-engineer"),
    (Domain::Testing, "ai-engineer"),
    (Domain::Architecture, "ai-engineer"),
    (Domain::Security, "ai-engineer"),
    (Domain::Performance, "ai-engineer"),
    (Domain::General, "ai-engineer"),
];

const SKILLS_BY_DOMAIN: &[(Domain, &[&str])] = &[
    (Domain::AiMl, &["ai-integration", "llm-prompting"]),
    (Domain::WebDev, &["react-patterns", "web-performance"]),
    (Domain::Database, &["sql-optimization", "data-modeling"]),
    (Domain::Devops, &["containerization", "ci-cd"]),
    (Domain::Testing, &["test-strategy", "mocking"]),
    (Domain::Documentation, &["technical-writing", "spec-kit"]),
    (Domain::Architecture, &["design-patterns", "system-design"]),
    (Domain::Security, &["auth-best-practices", "owasp"]),
    (Domain::Performance, &["profiling", "caching"]),
    (Domain::General, &["code-quality"]),
];

/// Pure classifier from free text to [`Classification`].
///
/// # Examples
///
/// ```rust
/// use cde_core::classifier::{Complexity, Domain, TaskClassifier};
///
/// let classification = TaskClassifier::classify("Fix typo in README");
/// assert_eq!(classification.complexity, Complexity::Trivial);
/// assert_eq!(classification.domain, Domain::Documentation);
/// assert_eq!(classification.est_context_lines, 500);
/// assert!(!classification.required_capabilities.plan_approval);
/// ```
pub struct TaskClassifier;

impl TaskClassifier {
    /// Classify a prompt. Deterministic and free of I/O.
    pub fn classify(prompt: &str) -> Classification {
        let folded = prompt.to_lowercase();

        let score = Self::complexity_score(&folded);
        let complexity = if score >= 8.0 {
            Complexity::Epic
        } else if score >= 6.0 {
            Complexity::Complex
        } else if score >= 4.0 {
            Complexity::Moderate
        } else if score >= 2.0 {
            Complexity::Simple
        } else {
            Complexity::Trivial
        };

        let domain = Self::detect_domain(&folded);
        let workflow_type = Self::detect_workflow_type(&folded, complexity);
        let plan_approval = Self::requires_plan_approval(&folded);
        let est_context_lines = Self::estimate_context_lines(&folded);
        let confidence = Self::confidence(&folded, domain);

        let heavy = matches!(complexity, Complexity::Complex | Complexity::Epic);
        let required_capabilities = CapabilitySet {
            async_execution: heavy,
            plan_approval,
            full_context: heavy || est_context_lines > 8000,
        };

        let reasoning = format!(
            "complexity={complexity} ({}), domain={domain}, workflow={workflow_type}, \
             score={score:.1}, est_context={est_context_lines} lines",
            complexity.estimated_duration(),
        );

        Classification {
            complexity,
            domain,
            workflow_type,
            required_capabilities,
            est_context_lines,
            confidence,
            reasoning,
        }
    }

    /// Classify and enrich with recipe, skills, and the next-action hint.
    pub fn recommend(prompt: &str) -> WorkflowRecommendation {
        let classification = Self::classify(prompt);

        let recipe_id = match classification.workflow_type {
            WorkflowType::Documentation => "documentation-writer".to_string(),
            WorkflowType::Research => "deep-research".to_string(),
            WorkflowType::Hotfix => "quick-fix".to_string(),
            _ => RECIPE_BY_DOMAIN
                .iter()
                .find(|(d, _)| *d == classification.domain)
                .map(|(_, r)| r.to_string())
                .unwrap_or_else(|| "ai-engineer".to_string()),
        };

        let mut required_skills = vec!["problem-solving".to_string()];
        if let Some((_, skills)) = SKILLS_BY_DOMAIN
            .iter()
            .find(|(d, _)| *d == classification.domain)
        {
            required_skills.extend(skills.iter().take(2).map(|s| s.to_string()));
        }
        if matches!(
            classification.complexity,
            Complexity::Complex | Complexity::Epic
        ) {
            for skill in ["system-design", "project-planning"] {
                if !required_skills.iter().any(|s| s == skill) {
                    required_skills.push(skill.to_string());
                }
            }
        }

        let next_action = if classification.confidence < 0.6 {
            "clarify_requirements"
        } else if matches!(
            classification.complexity,
            Complexity::Complex | Complexity::Epic
        ) {
            "research_skills"
        } else {
            "start_workflow"
        };

        let estimated_duration = classification.complexity.estimated_duration().to_string();
        WorkflowRecommendation {
            classification,
            recipe_id,
            required_skills,
            estimated_duration,
            next_action: next_action.to_string(),
        }
    }

    fn complexity_score(folded: &str) -> f64 {
        let mut score = 0.0;
        score += 3.0 * Self::count_matches(folded, EPIC_KEYWORDS) as f64;
        score += 2.0 * Self::count_matches(folded, COMPLEX_KEYWORDS) as f64;
        score += 1.0 * Self::count_matches(folded, MODERATE_KEYWORDS) as f64;
        score -= 0.5 * Self::count_matches(folded, SIMPLE_KEYWORDS) as f64;
        score += 2.0 * Self::count_matches(folded, HIGH_COMPLEXITY_TECH) as f64;
        score += 1.0 * Self::count_matches(folded, MEDIUM_COMPLEXITY_TECH) as f64;
        score += 2.0 * Self::count_matches(folded, BROAD_SCOPE) as f64;
        score += 1.0 * Self::count_matches(folded, MEDIUM_SCOPE) as f64;
        score.clamp(0.0, 10.0)
    }

    fn count_matches(folded: &str, keywords: &[&str]) -> usize {
        keywords.iter().filter(|kw| folded.contains(*kw)).count()
    }

    fn detect_domain(folded: &str) -> Domain {
        let mut best = Domain::General;
        let mut best_score = 0usize;
        for (domain, keywords) in DOMAIN_TABLE {
            let score = Self::count_matches(folded, keywords);
            if score > best_score {
                best = *domain;
                best_score = score;
            }
        }
        best
    }

    fn detect_workflow_type(folded: &str, complexity: Complexity) -> WorkflowType {
        if HOTFIX_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            return WorkflowType::Hotfix;
        }
        if RESEARCH_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            return WorkflowType::Research;
        }
        // Trivial work is routed straight to quick-fix even when the prompt
        // also mentions documentation files (a README typo is still a fix).
        if complexity == Complexity::Trivial {
            return WorkflowType::QuickFix;
        }
        if DOCUMENTATION_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            return WorkflowType::Documentation;
        }
        if QUICK_FIX_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            return WorkflowType::QuickFix;
        }
        if REFACTOR_KEYWORDS.iter().any(|kw| folded.contains(kw)) {
            return WorkflowType::Refactor;
        }
        WorkflowType::Standard
    }

    fn requires_plan_approval(folded: &str) -> bool {
        APPROVAL_KEYWORDS.iter().any(|kw| folded.contains(kw))
            || HIGH_RISK_PATTERNS.iter().any(|kw| folded.contains(kw))
    }

    fn estimate_context_lines(folded: &str) -> u32 {
        if ["architecture", "system", "refactor", "migration"]
            .iter()
            .any(|kw| folded.contains(kw))
        {
            50_000
        } else if ["feature", "module", "integration", "multiple files"]
            .iter()
            .any(|kw| folded.contains(kw))
        {
            10_000
        } else if ["fix", "typo", "single file", "one file"]
            .iter()
            .any(|kw| folded.contains(kw))
        {
            500
        } else {
            1_000
        }
    }

    fn confidence(folded: &str, domain: Domain) -> f64 {
        let mut confidence: f64 = 0.5;

        let keyword_matches = DOMAIN_TABLE
            .iter()
            .find(|(d, _)| *d == domain)
            .map(|(_, keywords)| Self::count_matches(folded, keywords))
            .unwrap_or(0);
        if keyword_matches >= 3 {
            confidence += 0.3;
        } else if keyword_matches >= 1 {
            confidence += 0.15;
        }

        let word_count = folded.split_whitespace().count();
        if word_count > 50 {
            confidence += 0.15;
        } else if word_count > 20 {
            confidence += 0.05;
        }

        confidence.clamp(0.0, 1.0)
    }
}
