//! One-shot workflows over the whole catalog: hunt and mitigation audit.
//!
//! Both walk `Catalog::all()` in order on the calling thread. A failing
//! technique is reported and counted, and the walk moves on.

use metrics::counter;

use crate::techs::{Catalog, Technique};
use crate::output::Notifier;
use crate::policy::Policy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    pub checked: usize,
    pub found: usize,
    pub cleaned: usize,
    pub mitigated: usize,
    pub failed: usize,
}

fn mitigate(tech: &dyn Technique, notifier: &dyn Notifier, report: &mut WorkflowReport) {
    let name = tech.name();
    notifier.info(&format!("Mitigating: {name}"));
    match tech.mitigate() {
        Ok(()) => {
            report.mitigated += 1;
            counter!("alertyx_actions_total", "action" => "mitigate", "outcome" => "ok").increment(1);
            notifier.positive(&format!("Mitigated: {name}"));
        }
        Err(e) => {
            report.failed += 1;
            counter!("alertyx_actions_total", "action" => "mitigate", "outcome" => "failed").increment(1);
            notifier.err(&format!("Error in mitigating: {name}: {e}"));
        }
    }
}

/// Scan for evidence of past exploitation, technique by technique.
///
/// With `active`, found evidence is cleaned; with `mitigate` as well, the
/// technique is mitigated afterwards.
pub fn hunt(catalog: &Catalog, policy: &Policy, notifier: &dyn Notifier) -> WorkflowReport {
    let mut report = WorkflowReport::default();

    for tech in catalog.all() {
        let name = tech.name();
        report.checked += 1;
        notifier.info(&format!("Hunting: {name}"));

        let finding = match tech.hunt() {
            Ok(f) => f,
            Err(e) => {
                report.failed += 1;
                notifier.err(&format!("Error in hunting: {name}: {e}"));
                continue;
            }
        };
        if !finding.found {
            log::debug!("hunt: {name} not found");
            continue;
        }

        report.found += 1;
        match &finding.event {
            Some(ev) => notifier.positive(&format!("Found: {name} {}", ev.render())),
            None => notifier.positive(&format!("Found: {name}")),
        }

        if !policy.active {
            continue;
        }
        if let Some(ev) = &finding.event {
            notifier.info(&format!("Cleaning: {name}"));
            match tech.clean(ev) {
                Ok(()) => {
                    report.cleaned += 1;
                    counter!("alertyx_actions_total", "action" => "clean", "outcome" => "ok").increment(1);
                    notifier.positive(&format!("Cleaned: {name}"));
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("alertyx_actions_total", "action" => "clean", "outcome" => "failed").increment(1);
                    notifier.err(&format!("Cleaning failed: {name}: {e}"));
                }
            }
        }
        if policy.may_mitigate() {
            mitigate(tech.as_ref(), notifier, &mut report);
        }
    }

    log::info!(
        "hunt finished: {} checked, {} found, {} cleaned, {} mitigated, {} failed",
        report.checked,
        report.found,
        report.cleaned,
        report.mitigated,
        report.failed
    );
    report
}

/// Report which mitigations apply. Only applies them when `active`.
pub fn audit(catalog: &Catalog, policy: &Policy, notifier: &dyn Notifier) -> WorkflowReport {
    let mut report = WorkflowReport::default();

    for tech in catalog.all() {
        let name = tech.name();
        report.checked += 1;
        notifier.info(&format!("Checking: {name}"));

        match tech.check() {
            Err(e) => {
                report.failed += 1;
                notifier.err(&format!("Error in checking: {name}: {e}"));
            }
            Ok(f) if !f.found => log::debug!("audit: {name} not applicable"),
            Ok(f) => {
                report.found += 1;
                if policy.active {
                    mitigate(tech.as_ref(), notifier, &mut report);
                } else {
                    notifier.positive(&format!("Mitigation possible: {name}"));
                    if let Some(ev) = &f.event {
                        notifier.tabber(1);
                        notifier.negative(&ev.render());
                        notifier.tabber(0);
                    }
                }
            }
        }
    }

    log::info!(
        "audit finished: {} checked, {} applicable, {} mitigated, {} failed",
        report.checked,
        report.found,
        report.mitigated,
        report.failed
    );
    report
}
