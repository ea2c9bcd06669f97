//! Terminal rendering of memberships, plans and save reports.

use colored::Colorize;
use devdash_mapping::catalog::{worktree_apps, worktree_pipelines, worktree_services};
use devdash_mapping::{EntityId, Relation, RelationTuple, SavePlan, SaveReport};
use std::collections::BTreeMap;

pub fn print_catalog() {
    println!("{}", "Relations".green().bold());
    print_relation_row("apps", &worktree_apps());
    print_relation_row("pipelines", &worktree_pipelines());
    print_relation_row("services", &worktree_services());
}

fn print_relation_row<L, R>(kind: &str, relation: &Relation<L, R>) {
    println!(
        "  {:<10} {} ({} → {})",
        kind.bold(),
        relation.name(),
        relation.left_column(),
        relation.right_column()
    );
}

pub fn print_membership<L: EntityId, R: EntityId>(
    relation: &Relation<L, R>,
    tuples: &[RelationTuple<L, R>],
) {
    if tuples.is_empty() {
        println!("{} no rows in {}", "info:".yellow().bold(), relation.name());
        return;
    }
    let mut grouped: BTreeMap<&L, Vec<&R>> = BTreeMap::new();
    for tuple in tuples {
        grouped.entry(&tuple.left).or_default().push(&tuple.right);
    }
    println!(
        "{} {} ({} rows)",
        "Relation".green().bold(),
        relation.name(),
        tuples.len()
    );
    for (left, rights) in grouped {
        println!("  {}", left.to_string().bold());
        for right in rights {
            println!("    {} {right}", "→".yellow());
        }
    }
}

pub fn print_plan<L: EntityId, R: EntityId>(relation: &Relation<L, R>, plan: &SavePlan<L, R>) {
    if plan.is_empty() {
        println!("{} nothing to save in {}", "info:".yellow().bold(), relation.name());
        return;
    }
    println!(
        "{} {} ({} deletes, {} inserts)",
        "Plan".green().bold(),
        relation.name(),
        plan.deletes.len(),
        plan.inserts.len()
    );
    for tuple in &plan.deletes {
        println!("  {} {tuple}", "-".red());
    }
    for tuple in &plan.inserts {
        println!("  {} {tuple}", "+".green());
    }
}

pub fn print_report<L: EntityId, R: EntityId>(report: &SaveReport<L, R>) {
    let headline = if report.is_success() {
        "saved".green().bold()
    } else {
        "partially saved".yellow().bold()
    };
    println!(
        "{headline} {}: {} inserted, {} deleted, {} failed",
        report.relation,
        report.inserted.len(),
        report.deleted.len(),
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "  {} {} ({}, {}): {}",
            "failed".red().bold(),
            failure.op,
            failure.left,
            failure.right,
            failure.error
        );
    }
}
