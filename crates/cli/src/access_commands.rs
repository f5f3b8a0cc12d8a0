use {
    anyhow::Result,
    clap::Subcommand,
    sqlx::SqlitePool,
    switchboard_channels::{
        AccessRuleStore,
        access::{self, AccessDecision, Evaluation},
    },
    switchboard_gateway::access_store::SqliteAccessRuleStore,
};

#[derive(Subcommand)]
pub enum AccessAction {
    /// Evaluate the stored rules for a sender on an instance.
    Check {
        /// Sender phone number, with or without `+`.
        phone: String,
        /// Instance the message would arrive on.
        instance: String,
    },
}

pub async fn handle_access(action: AccessAction, pool: SqlitePool) -> Result<()> {
    match action {
        AccessAction::Check { phone, instance } => {
            let rules = SqliteAccessRuleStore::new(pool)
                .snapshot(&instance)
                .await?;
            let evaluation = access::evaluate(&rules, &phone, &instance);
            println!("{}", describe(&evaluation));
        },
    }
    Ok(())
}

fn describe(evaluation: &Evaluation<'_>) -> String {
    let decision = match evaluation.decision {
        AccessDecision::Allowed => "allowed",
        AccessDecision::Blocked => "blocked",
    };
    match evaluation.matched {
        Some(rule) => format!(
            "{decision} by rule #{} ({} {}, {})",
            rule.id,
            rule.rule_type,
            rule.phone_pattern,
            rule.scope.as_deref().unwrap_or("global")
        ),
        None => format!("{decision} (no rule matched)"),
    }
}
