use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Every role a profile can hold
pub const ROLES: &[&str] = &[
    "super_admin",
    "admin",
    "manager",
    "hr_admin",
    "sup_admin",
    "office_admin",
    "marketing_admin",
    "user",
];

/// Roles allowed on the admin surface
pub const ADMIN_ROLES: &[&str] = &["super_admin", "admin"];

pub fn is_valid_role(role: &str) -> bool {
    ROLES.contains(&role)
}

pub fn is_admin_role(role: &str) -> bool {
    ADMIN_ROLES.contains(&role)
}

/// A due agent that ran this recently is skipped by the dispatcher
pub const DISPATCH_MIN_INTERVAL_MINUTES: i64 = 4;

/// Trigger source recorded on dispatcher runs
pub const DISPATCHER_SOURCE: &str = "agent-dispatcher";

/// Which agents react to which business events
pub const EVENT_ROUTES: &[(&str, &[&str])] = &[
    // Employee events
    ("employee.created", &["hr_auditor", "gap_analyzer", "personal_coach"]),
    ("employee.updated", &["hr_auditor", "compliance_tracker"]),
    ("employee.deactivated", &["engagement_pulse"]),
    // Skill events
    ("skill.created", &["role_mapper", "course_architect"]),
    ("skill.updated", &["gap_analyzer"]),
    ("employee_skill.updated", &["gap_analyzer", "mentor_matchmaker", "personal_coach"]),
    // Time and attendance
    ("time_entry.created", &["payroll_watchdog"]),
    ("time_entry.anomaly", &["payroll_watchdog", "attendance_monitor"]),
    ("attendance.no_show", &["attendance_monitor", "engagement_pulse"]),
    // Reviews
    ("review_cycle.opened", &["review_orchestrator"]),
    ("review_cycle.closing_soon", &["review_orchestrator"]),
    ("review.completed", &["review_orchestrator", "personal_coach"]),
    // Training
    ("training.enrolled", &["personal_coach"]),
    ("training.completed", &["personal_coach", "engagement_pulse"]),
    ("quiz.passed", &["personal_coach", "gap_analyzer"]),
    // Goals
    ("goal.updated", &["personal_coach"]),
    ("goal.completed", &["personal_coach", "engagement_pulse"]),
    // Credentials
    ("license.expiring", &["compliance_tracker"]),
    ("certification.expiring", &["compliance_tracker"]),
    // Referrals
    ("referral.synced", &["referral_intelligence"]),
    ("partner.visit_logged", &["referral_intelligence"]),
    // Inter-agent
    ("agent.proposal_created", &["supervisor_agent"]),
    ("agent.failed", &["supervisor_agent"]),
    ("agent.budget_warning", &["supervisor_agent"]),
];

/// Agents listening for `event`; empty for unknown events
pub fn agents_for_event(event: &str) -> &'static [&'static str] {
    EVENT_ROUTE_INDEX.get(event).copied().unwrap_or(&[])
}

static EVENT_ROUTE_INDEX: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| EVENT_ROUTES.iter().copied().collect());
