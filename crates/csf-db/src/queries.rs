//! C7/C8 query and write implementations for [`Store`].

use chrono::{DateTime, Utc};
use csf_types::{
    AggregateResult, CheckOutcome, ClientInfo, ClientStatus, DashboardSummary, EvidenceRecord,
    MachineKeyRecord, PolicyStats, Submission, SubmissionSummary, SystemInfo,
};
use sqlx::Row;
use uuid::Uuid;

use crate::{is_unique_violation, Store, StoreError};

impl Store {
    /// `SaveSubmission` (spec.md §4.C7): insert the submission, upsert the
    /// client row, commit atomically. Returns `DuplicateSubmission` if
    /// `submission_id` already exists, mapped by the server to `409`.
    pub async fn save_submission(&self, s: &Submission) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            insert into submissions (
                submission_id, client_id, hostname, scan_timestamp, policy_id,
                policy_version, aggregate_result, checks, evidence, system_info
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(s.submission_id)
        .bind(&s.client_id)
        .bind(&s.hostname)
        .bind(s.scan_timestamp)
        .bind(&s.policy_id)
        .bind(&s.policy_version)
        .bind(aggregate_result_str(s.aggregate_result))
        .bind(serde_json::to_value(&s.checks)?)
        .bind(serde_json::to_value(&s.evidence)?)
        .bind(serde_json::to_value(&s.system_info)?)
        .execute(&mut *tx)
        .await;

        if let Err(err) = insert {
            if is_unique_violation(&err) {
                return Err(StoreError::DuplicateSubmission);
            }
            return Err(StoreError::Sqlx(err));
        }

        upsert_client_liveness_tx(&mut tx, &s.client_id, &s.hostname, &s.system_info, s.scan_timestamp).await?;

        tx.commit().await?;
        Ok(())
    }

    /// `UpsertClientLiveness` (spec.md §4.C7): the same client upsert as
    /// `save_submission`, without a submission.
    pub async fn upsert_client_liveness(
        &self,
        client_id: &str,
        hostname: &str,
        system_info: &SystemInfo,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_client_liveness_tx(&mut tx, client_id, hostname, system_info, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `GetSubmission` (spec.md §4.C8).
    pub async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let row = sqlx::query(
            r#"
            select submission_id, client_id, hostname, scan_timestamp, policy_id,
                   policy_version, aggregate_result, checks, evidence, system_info
            from submissions
            where submission_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(submission_from_row).transpose()
    }

    /// `ListClientSubmissions` (spec.md §4.C8), ordered by timestamp desc.
    pub async fn list_client_submissions(&self, client_id: &str) -> Result<Vec<SubmissionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            select submission_id, client_id, hostname, scan_timestamp, policy_id,
                   policy_version, aggregate_result, checks
            from submissions
            where client_id = $1
            order by scan_timestamp desc
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(summary_from_row).collect()
    }

    /// `ListClients` (spec.md §4.C8), with per-client compliance score
    /// computed in the store (division-by-zero guarded to zero).
    pub async fn list_clients(&self) -> Result<Vec<ClientInfo>, StoreError> {
        let rows = sqlx::query(
            r#"
            select
                c.client_id, c.hostname, c.first_seen, c.last_seen, c.status,
                c.os_id, c.os_build, c.arch, c.domain, c.primary_ipv4, c.primary_mac,
                count(s.submission_id) as total,
                count(s.submission_id) filter (where s.aggregate_result = 'compliant') as compliant
            from clients c
            left join submissions s on s.client_id = c.client_id
            group by c.client_id
            order by c.client_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(client_info_from_row).collect()
    }

    /// `DashboardSummary` (spec.md §4.C8).
    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, StoreError> {
        let total_clients: i64 = sqlx::query_scalar("select count(*) from clients")
            .fetch_one(&self.pool)
            .await?;

        let active_clients: i64 = sqlx::query_scalar(
            "select count(*) from clients where last_seen > now() - interval '24 hours'",
        )
        .fetch_one(&self.pool)
        .await?;

        let compliant_clients: i64 = sqlx::query_scalar(
            r#"
            select count(*) from (
                select distinct on (client_id) client_id, aggregate_result
                from submissions
                order by client_id, scan_timestamp desc
            ) latest
            where latest.aggregate_result = 'compliant'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let recent_rows = sqlx::query(
            r#"
            select submission_id, client_id, hostname, scan_timestamp, policy_id,
                   policy_version, aggregate_result, checks
            from submissions
            order by scan_timestamp desc
            limit 10
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let recent_submissions = recent_rows.into_iter().map(summary_from_row).collect::<Result<Vec<_>, _>>()?;

        let policy_rows = sqlx::query(
            r#"
            select policy_id, aggregate_result, checks
            from submissions
            order by policy_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let policy_stats = policy_stats_from_rows(policy_rows)?;

        Ok(DashboardSummary {
            total_clients: total_clients as u64,
            active_clients: active_clients as u64,
            compliant_clients: compliant_clients as u64,
            recent_submissions,
            policy_stats,
        })
    }

    /// `ClearClientHistory` (spec.md §4.C8): bulk delete a client's
    /// submissions without removing the client row.
    pub async fn clear_client_history(&self, client_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("delete from submissions where client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // -- C9 janitors -------------------------------------------------------

    pub async fn sweep_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("delete from refresh_tokens where expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn sweep_revocations(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("delete from revocations where original_expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn sweep_audit_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("delete from audit_events where occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // -- C8 single-client lookup --------------------------------------------

    /// `GET /api/v1/clients/{id}` (spec.md §6), same score derivation as
    /// `list_clients`.
    pub async fn get_client(&self, client_id: &str) -> Result<Option<ClientInfo>, StoreError> {
        let row = sqlx::query(
            r#"
            select
                c.client_id, c.hostname, c.first_seen, c.last_seen, c.status,
                c.os_id, c.os_build, c.arch, c.domain, c.primary_ipv4, c.primary_mac,
                count(s.submission_id) as total,
                count(s.submission_id) filter (where s.aggregate_result = 'compliant') as compliant
            from clients c
            left join submissions s on s.client_id = c.client_id
            where c.client_id = $1
            group by c.client_id
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(client_info_from_row).transpose()
    }

    // -- C6 machine-key administration ---------------------------------------

    /// `GET /api/v1/apikeys`: every key, hash never exposed (caller maps to
    /// [`csf_types::ApiKeySummary`]).
    pub async fn list_machine_keys(&self) -> Result<Vec<MachineKeyRecord>, StoreError> {
        let rows = sqlx::query(
            "select id, name, bcrypt_hash, display_prefix, created_by, created_at, \
             last_used_at, expires_at, active from machine_keys order by id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(machine_key_from_row).collect()
    }

    /// `POST /api/v1/apikeys/generate`: persists a freshly generated key
    /// record. The plain key itself is never stored; callers pass only its
    /// bcrypt hash and display prefix.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_machine_key(
        &self,
        name: &str,
        bcrypt_hash: &str,
        display_prefix: &str,
        created_by: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            insert into machine_keys (name, bcrypt_hash, display_prefix, created_by, created_at, expires_at)
            values ($1, $2, $3, $4, $5, $6)
            returning id
            "#,
        )
        .bind(name)
        .bind(bcrypt_hash)
        .bind(display_prefix)
        .bind(created_by)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    /// `POST /api/v1/apikeys/toggle`.
    pub async fn set_machine_key_active(&self, id: i64, active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("update machine_keys set active = $1 where id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// `POST /api/v1/apikeys/delete`.
    pub async fn delete_machine_key(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("delete from machine_keys where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // -- C6 audit trail -------------------------------------------------------

    /// Records one authentication attempt, successful or not (spec.md
    /// §4.C6 failure semantics).
    pub async fn insert_audit_event(
        &self,
        principal_attempt: &str,
        reason: &str,
        remote_addr: &str,
        success: bool,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "insert into audit_events (occurred_at, principal_attempt, reason, remote_addr, success) \
             values ($1, $2, $3, $4, $5)",
        )
        .bind(occurred_at)
        .bind(principal_attempt)
        .bind(reason)
        .bind(remote_addr)
        .bind(success)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn upsert_client_liveness_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    client_id: &str,
    hostname: &str,
    system_info: &SystemInfo,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into clients (
            client_id, hostname, first_seen, last_seen, os_id, os_build, arch,
            domain, primary_ipv4, primary_mac, status
        ) values ($1, $2, $3, $3, $4, $5, $6, $7, $8, $9, 'active')
        on conflict (client_id) do update set
            hostname = excluded.hostname,
            last_seen = excluded.last_seen,
            os_id = excluded.os_id,
            os_build = excluded.os_build,
            arch = excluded.arch,
            domain = excluded.domain,
            primary_ipv4 = excluded.primary_ipv4,
            primary_mac = excluded.primary_mac,
            status = 'active'
        "#,
    )
    .bind(client_id)
    .bind(hostname)
    .bind(now)
    .bind(&system_info.os_id)
    .bind(&system_info.os_build)
    .bind(&system_info.arch)
    .bind(&system_info.domain)
    .bind(&system_info.primary_ipv4)
    .bind(&system_info.primary_mac)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn aggregate_result_str(r: AggregateResult) -> &'static str {
    match r {
        AggregateResult::Compliant => "compliant",
        AggregateResult::NonCompliant => "non_compliant",
        AggregateResult::Partial => "partial",
        AggregateResult::Error => "error",
    }
}

fn aggregate_result_from_str(s: &str) -> AggregateResult {
    match s {
        "compliant" => AggregateResult::Compliant,
        "error" => AggregateResult::Error,
        "partial" => AggregateResult::Partial,
        _ => AggregateResult::NonCompliant,
    }
}

fn submission_from_row(row: sqlx::postgres::PgRow) -> Result<Submission, StoreError> {
    let checks: serde_json::Value = row.try_get("checks")?;
    let evidence: serde_json::Value = row.try_get("evidence")?;
    let system_info: serde_json::Value = row.try_get("system_info")?;

    Ok(Submission {
        submission_id: row.try_get("submission_id")?,
        client_id: row.try_get("client_id")?,
        hostname: row.try_get("hostname")?,
        scan_timestamp: row.try_get("scan_timestamp")?,
        policy_id: row.try_get("policy_id")?,
        policy_version: row.try_get("policy_version")?,
        aggregate_result: aggregate_result_from_str(row.try_get::<String, _>("aggregate_result")?.as_str()),
        checks: serde_json::from_value::<Vec<CheckOutcome>>(checks)?,
        evidence: serde_json::from_value::<Vec<EvidenceRecord>>(evidence)?,
        system_info: serde_json::from_value::<SystemInfo>(system_info)?,
    })
}

fn summary_from_row(row: sqlx::postgres::PgRow) -> Result<SubmissionSummary, StoreError> {
    let checks: serde_json::Value = row.try_get("checks")?;
    let checks: Vec<CheckOutcome> = serde_json::from_value(checks)?;
    let aggregate_result = aggregate_result_from_str(row.try_get::<String, _>("aggregate_result")?.as_str());

    Ok(SubmissionSummary {
        submission_id: row.try_get("submission_id")?,
        client_id: row.try_get("client_id")?,
        hostname: row.try_get("hostname")?,
        scan_timestamp: row.try_get("scan_timestamp")?,
        policy_id: row.try_get("policy_id")?,
        policy_version: row.try_get("policy_version")?,
        aggregate_result,
        counts: csf_types::CheckCounts::from_checks(&checks),
    })
}

fn client_info_from_row(row: sqlx::postgres::PgRow) -> Result<ClientInfo, StoreError> {
    let total: i64 = row.try_get("total")?;
    let compliant: i64 = row.try_get("compliant")?;
    let compliance_score = if total == 0 { 0.0 } else { 100.0 * compliant as f64 / total as f64 };

    let status: String = row.try_get("status")?;

    Ok(ClientInfo {
        client_id: row.try_get("client_id")?,
        hostname: row.try_get("hostname")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        last_system_info: SystemInfo {
            os_id: row.try_get("os_id")?,
            os_build: row.try_get("os_build")?,
            arch: row.try_get("arch")?,
            domain: row.try_get("domain")?,
            primary_ipv4: row.try_get("primary_ipv4")?,
            primary_mac: row.try_get("primary_mac")?,
        },
        status: if status == "active" { ClientStatus::Active } else { ClientStatus::Inactive },
        compliance_score,
    })
}

fn machine_key_from_row(row: sqlx::postgres::PgRow) -> Result<MachineKeyRecord, StoreError> {
    Ok(MachineKeyRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        bcrypt_hash: row.try_get("bcrypt_hash")?,
        display_prefix: row.try_get("display_prefix")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
    })
}

fn policy_stats_from_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<PolicyStats>, StoreError> {
    use std::collections::BTreeMap;

    struct Acc {
        total: u64,
        passed: u64,
        failed: u64,
        score_sum: f64,
        scored: u64,
    }

    let mut by_policy: BTreeMap<String, Acc> = BTreeMap::new();

    for row in rows {
        let policy_id: String = row.try_get("policy_id")?;
        let aggregate_result = aggregate_result_from_str(row.try_get::<String, _>("aggregate_result")?.as_str());
        let checks: serde_json::Value = row.try_get("checks")?;
        let checks: Vec<CheckOutcome> = serde_json::from_value(checks)?;
        let counts = csf_types::CheckCounts::from_checks(&checks);

        let acc = by_policy.entry(policy_id).or_insert(Acc {
            total: 0,
            passed: 0,
            failed: 0,
            score_sum: 0.0,
            scored: 0,
        });

        acc.total += 1;
        match aggregate_result {
            AggregateResult::Compliant => acc.passed += 1,
            AggregateResult::NonCompliant | AggregateResult::Error => acc.failed += 1,
            AggregateResult::Partial => {}
        }

        let check_total = counts.total();
        if check_total > 0 {
            acc.score_sum += 100.0 * counts.passed as f64 / check_total as f64;
            acc.scored += 1;
        }
    }

    Ok(by_policy
        .into_iter()
        .map(|(policy_id, acc)| PolicyStats {
            policy_id,
            total_submissions: acc.total,
            mean_score: if acc.scored == 0 { 0.0 } else { acc.score_sum / acc.scored as f64 },
            pass_rate: if acc.total == 0 { 0.0 } else { 100.0 * acc.passed as f64 / acc.total as f64 },
            fail_rate: if acc.total == 0 { 0.0 } else { 100.0 * acc.failed as f64 / acc.total as f64 },
        })
        .collect())
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Sqlx(sqlx::Error::Decode(Box::new(e)))
    }
}
