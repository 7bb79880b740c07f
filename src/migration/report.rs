//! Migration results

use crate::domain::TenantTable;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Rows copied by one migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub old_tenant_id: String,
    pub new_tenant_id: String,
    pub messages: usize,
    pub conversation_logs: usize,
    pub connections: usize,
    pub economy_accounts: usize,
    pub economy_transactions: usize,
}

impl MigrationSummary {
    pub fn total(&self) -> usize {
        self.messages
            + self.conversation_logs
            + self.connections
            + self.economy_accounts
            + self.economy_transactions
    }
}

/// Row-count comparison for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCheck {
    pub old_count: u64,
    pub new_count: u64,
    pub count_match: bool,
}

impl CategoryCheck {
    pub fn new(old_count: u64, new_count: u64) -> Self {
        Self {
            old_count,
            new_count,
            count_match: old_count == new_count,
        }
    }
}

/// Tenant record comparison, identity fields excluded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCheck {
    pub old_exists: bool,
    pub new_exists: bool,
    pub mismatched_fields: Vec<String>,
}

impl TenantCheck {
    pub fn passed(&self) -> bool {
        self.old_exists && self.new_exists && self.mismatched_fields.is_empty()
    }
}

/// Advisory parity report; never enforced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub old_tenant_id: String,
    pub new_tenant_id: String,
    pub verified_at: DateTime<Utc>,
    pub tenant: TenantCheck,
    pub messages: CategoryCheck,
    pub conversation_logs: CategoryCheck,
    pub connections: CategoryCheck,
    pub economy_accounts: CategoryCheck,
    pub economy_transactions: CategoryCheck,
    pub passed: bool,
}

impl MigrationReport {
    pub fn category(&self, table: TenantTable) -> &CategoryCheck {
        match table {
            TenantTable::Messages => &self.messages,
            TenantTable::ConversationLogs => &self.conversation_logs,
            TenantTable::Connections => &self.connections,
            TenantTable::EconomyAccounts => &self.economy_accounts,
            TenantTable::EconomyTransactions => &self.economy_transactions,
        }
    }

    fn category_mut(&mut self, table: TenantTable) -> &mut CategoryCheck {
        match table {
            TenantTable::Messages => &mut self.messages,
            TenantTable::ConversationLogs => &mut self.conversation_logs,
            TenantTable::Connections => &mut self.connections,
            TenantTable::EconomyAccounts => &mut self.economy_accounts,
            TenantTable::EconomyTransactions => &mut self.economy_transactions,
        }
    }

    pub(crate) fn new(old_tenant_id: &str, new_tenant_id: &str, tenant: TenantCheck) -> Self {
        Self {
            old_tenant_id: old_tenant_id.to_string(),
            new_tenant_id: new_tenant_id.to_string(),
            verified_at: Utc::now(),
            tenant,
            messages: CategoryCheck::default(),
            conversation_logs: CategoryCheck::default(),
            connections: CategoryCheck::default(),
            economy_accounts: CategoryCheck::default(),
            economy_transactions: CategoryCheck::default(),
            passed: false,
        }
    }

    pub(crate) fn set_category(&mut self, table: TenantTable, check: CategoryCheck) {
        *self.category_mut(table) = check;
    }

    /// Recompute `passed` from the tenant check and every category
    pub(crate) fn finish(mut self) -> Self {
        self.passed = self.tenant.passed()
            && TenantTable::ALL
                .iter()
                .all(|table| self.category(*table).count_match);
        self
    }

    /// Labels of categories whose counts differ
    pub fn mismatched_categories(&self) -> Vec<&'static str> {
        TenantTable::ALL
            .iter()
            .filter(|table| !self.category(**table).count_match)
            .map(|table| table.label())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_camel_case() {
        let tenant = TenantCheck {
            old_exists: true,
            new_exists: true,
            mismatched_fields: vec![],
        };
        let mut report = MigrationReport::new("a", "b", tenant);
        for table in TenantTable::ALL {
            report.set_category(table, CategoryCheck::new(2, 2));
        }
        report.set_category(TenantTable::Connections, CategoryCheck::new(3, 1));
        let report = report.finish();

        assert!(!report.passed);
        assert_eq!(report.mismatched_categories(), vec!["connections"]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["economyAccounts"]["oldCount"], 2);
        assert_eq!(json["connections"]["countMatch"], false);
        assert_eq!(json["tenant"]["mismatchedFields"], serde_json::json!([]));
        assert_eq!(json["passed"], false);
    }
}
