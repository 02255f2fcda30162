//! Post-hoc analysis over the proxy attempt log.
//!
//! Pure read path: aggregates the rejection rows captured by the validation
//! pipeline into summary statistics and a list of suspicious patterns.
//! Nothing here blocks a mark attempt; the output is for staff reviewing a
//! course after the fact.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use db::models::proxy_attempt::{self, AttemptType};
use db::models::student_device;
use db::models::user;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use serde::Serialize;
use util::config::AppConfig;

#[derive(Debug, Clone)]
pub struct AnalysisFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub attempt_type: Option<AttemptType>,
    /// Caps the echoed attempt rows only. Statistics and patterns always
    /// cover the whole window.
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ProxyAnalysis {
    pub attempts: Vec<proxy_attempt::Model>,
    pub stats: AttemptStats,
    pub patterns: Vec<SuspiciousPattern>,
}

#[derive(Debug, Serialize)]
pub struct AttemptStats {
    pub total_attempts: u64,
    pub by_attempt_type: BTreeMap<String, u64>,
    pub top_failure_reasons: Vec<ReasonCount>,
    pub hourly_histogram: [u64; 24],
    pub distinct_students: u64,
    pub distinct_ips: u64,
    pub distinct_devices: u64,
    pub daily_trend: Vec<DayCount>,
}

#[derive(Debug, Serialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected pattern. Serialized with a `type` tag so clients can render
/// each kind without sniffing fields.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuspiciousPattern {
    HighFrequency {
        severity: Severity,
        description: String,
        student_id: i64,
        username: String,
        attempt_count: u64,
    },
    MultipleDevices {
        severity: Severity,
        description: String,
        student_id: i64,
        username: String,
        device_count: u64,
    },
    IpSharing {
        severity: Severity,
        description: String,
        ip_address: String,
        student_count: u64,
        students: Vec<StudentRef>,
    },
    DeviceSharing {
        severity: Severity,
        description: String,
        device_fingerprint: String,
        student_count: u64,
        students: Vec<StudentRef>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentRef {
    pub id: i64,
    pub username: String,
}

/// Loads the attempts in the window and derives statistics plus patterns.
///
/// Detection thresholds come from configuration. Pattern order is
/// deterministic: high-frequency students first (ascending id), then
/// multi-device students, then shared IPs, then shared devices.
pub async fn analyze(
    db: &DatabaseConnection,
    filter: AnalysisFilter,
) -> Result<ProxyAnalysis, DbErr> {
    let (high_frequency_threshold, multi_device_threshold, shared_actor_threshold) = {
        let cfg = AppConfig::global();
        (
            cfg.high_frequency_threshold,
            cfg.multi_device_threshold,
            cfg.shared_actor_threshold,
        )
    };

    let rows =
        proxy_attempt::Model::in_range(db, filter.from, filter.to, filter.attempt_type, None)
            .await?;

    let stats = compute_stats(&rows);
    let patterns = detect_patterns(
        db,
        &rows,
        high_frequency_threshold,
        multi_device_threshold,
        shared_actor_threshold,
    )
    .await?;

    let mut attempts = rows;
    if let Some(limit) = filter.limit {
        attempts.truncate(limit as usize);
    }

    Ok(ProxyAnalysis {
        attempts,
        stats,
        patterns,
    })
}

fn compute_stats(rows: &[proxy_attempt::Model]) -> AttemptStats {
    let mut by_attempt_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut reasons: BTreeMap<&str, u64> = BTreeMap::new();
    let mut hourly_histogram = [0u64; 24];
    let mut students = BTreeSet::new();
    let mut ips = BTreeSet::new();
    let mut devices = BTreeSet::new();
    let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();

    for row in rows {
        *by_attempt_type
            .entry(row.attempt_type.to_string())
            .or_insert(0) += 1;
        *reasons.entry(row.failure_reason.as_str()).or_insert(0) += 1;
        hourly_histogram[row.created_at.hour() as usize] += 1;
        if let Some(id) = row.student_id {
            students.insert(id);
        }
        if let Some(ip) = &row.ip_address {
            ips.insert(ip.as_str());
        }
        if let Some(fp) = &row.device_fingerprint {
            devices.insert(fp.as_str());
        }
        *daily.entry(row.created_at.date_naive()).or_insert(0) += 1;
    }

    let mut top_failure_reasons: Vec<ReasonCount> = reasons
        .into_iter()
        .map(|(reason, count)| ReasonCount {
            reason: reason.to_owned(),
            count,
        })
        .collect();
    // Stable sort: ties stay in the alphabetical order the map walk produced.
    top_failure_reasons.sort_by(|a, b| b.count.cmp(&a.count));
    top_failure_reasons.truncate(10);

    AttemptStats {
        total_attempts: rows.len() as u64,
        by_attempt_type,
        top_failure_reasons,
        hourly_histogram,
        distinct_students: students.len() as u64,
        distinct_ips: ips.len() as u64,
        distinct_devices: devices.len() as u64,
        daily_trend: daily
            .into_iter()
            .map(|(date, count)| DayCount { date, count })
            .collect(),
    }
}

async fn detect_patterns(
    db: &DatabaseConnection,
    rows: &[proxy_attempt::Model],
    high_frequency_threshold: u64,
    multi_device_threshold: u64,
    shared_actor_threshold: u64,
) -> Result<Vec<SuspiciousPattern>, DbErr> {
    let mut per_student: BTreeMap<i64, u64> = BTreeMap::new();
    let mut devices_per_student: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    let mut students_per_ip: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    let mut students_per_device: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();

    // Rows with a null student ref cannot be attributed; they still count in
    // the statistics, just not in per-actor grouping.
    for row in rows {
        let Some(student_id) = row.student_id else {
            continue;
        };
        *per_student.entry(student_id).or_insert(0) += 1;
        if let Some(fp) = &row.device_fingerprint {
            devices_per_student
                .entry(student_id)
                .or_default()
                .insert(fp.clone());
            students_per_device
                .entry(fp.clone())
                .or_default()
                .insert(student_id);
        }
        if let Some(ip) = &row.ip_address {
            students_per_ip
                .entry(ip.clone())
                .or_default()
                .insert(student_id);
        }
    }

    // A student juggling devices usually keeps one bound; count it alongside
    // the fingerprints seen on rejected attempts.
    let student_ids: Vec<i64> = per_student.keys().copied().collect();
    if !student_ids.is_empty() {
        let bound = student_device::Entity::find()
            .filter(student_device::Column::StudentId.is_in(student_ids))
            .filter(student_device::Column::IsActive.eq(true))
            .all(db)
            .await?;
        for device in bound {
            devices_per_student
                .entry(device.student_id)
                .or_default()
                .insert(device.fingerprint);
        }
    }

    let mut referenced: BTreeSet<i64> = per_student.keys().copied().collect();
    for set in students_per_ip.values() {
        referenced.extend(set.iter().copied());
    }
    for set in students_per_device.values() {
        referenced.extend(set.iter().copied());
    }
    let usernames: HashMap<i64, String> = if referenced.is_empty() {
        HashMap::new()
    } else {
        user::Entity::find()
            .filter(user::Column::Id.is_in(referenced.into_iter().collect::<Vec<_>>()))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect()
    };
    let username_of =
        |id: i64| -> String { usernames.get(&id).cloned().unwrap_or_else(|| format!("user-{id}")) };

    let mut patterns = Vec::new();

    for (&student_id, &attempt_count) in &per_student {
        if attempt_count >= high_frequency_threshold {
            patterns.push(SuspiciousPattern::HighFrequency {
                severity: severity_for(attempt_count, high_frequency_threshold),
                description: format!(
                    "{attempt_count} rejected attempts by one student in the analysis window"
                ),
                student_id,
                username: username_of(student_id),
                attempt_count,
            });
        }
    }

    for (&student_id, devices) in &devices_per_student {
        let device_count = devices.len() as u64;
        if device_count >= multi_device_threshold {
            patterns.push(SuspiciousPattern::MultipleDevices {
                severity: severity_for(device_count, multi_device_threshold),
                description: format!("One student seen on {device_count} distinct devices"),
                student_id,
                username: username_of(student_id),
                device_count,
            });
        }
    }

    for (ip_address, students) in &students_per_ip {
        let student_count = students.len() as u64;
        if student_count >= shared_actor_threshold {
            patterns.push(SuspiciousPattern::IpSharing {
                severity: severity_for(student_count, shared_actor_threshold),
                description: format!(
                    "{student_count} students attempted from the same IP address"
                ),
                ip_address: ip_address.clone(),
                student_count,
                students: students
                    .iter()
                    .map(|&id| StudentRef {
                        id,
                        username: username_of(id),
                    })
                    .collect(),
            });
        }
    }

    for (fingerprint, students) in &students_per_device {
        let student_count = students.len() as u64;
        if student_count >= shared_actor_threshold {
            patterns.push(SuspiciousPattern::DeviceSharing {
                severity: severity_for(student_count, shared_actor_threshold),
                description: format!("{student_count} students attempted from the same device"),
                device_fingerprint: fingerprint.clone(),
                student_count,
                students: students
                    .iter()
                    .map(|&id| StudentRef {
                        id,
                        username: username_of(id),
                    })
                    .collect(),
            });
        }
    }

    Ok(patterns)
}

/// Severity grows with multiples of the firing threshold: at the threshold
/// itself a pattern is low, at double it medium, then high, then critical.
fn severity_for(count: u64, threshold: u64) -> Severity {
    let threshold = threshold.max(1);
    if count >= threshold * 4 {
        Severity::Critical
    } else if count >= threshold * 3 {
        Severity::High
    } else if count >= threshold * 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use db::models::proxy_attempt::{Model as ProxyAttempt, NewProxyAttempt};
    use db::models::user::Role;
    use db::test_utils::setup_test_db;

    async fn seed_students(db: &DatabaseConnection, n: usize) -> Vec<user::Model> {
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(
                user::Model::create(db, &format!("u{i:08}"), &format!("s{i}@test.com"), Role::Student)
                    .await
                    .unwrap(),
            );
        }
        out
    }

    fn attempt(
        student_id: Option<i64>,
        attempt_type: AttemptType,
        ip: &str,
        device: Option<&str>,
    ) -> NewProxyAttempt {
        NewProxyAttempt {
            session_id: None,
            student_id,
            attempt_type,
            failure_reason: "rejected".to_owned(),
            device_fingerprint: device.map(str::to_owned),
            ip_address: Some(ip.to_owned()),
            user_agent: None,
            latitude: None,
            longitude: None,
            token_attempted: None,
        }
    }

    fn whole_window() -> AnalysisFilter {
        AnalysisFilter {
            from: Utc::now() - Duration::hours(1),
            to: Utc::now() + Duration::hours(1),
            attempt_type: None,
            limit: None,
        }
    }

    #[tokio::test]
    async fn stats_summarize_the_window() {
        let db = setup_test_db().await;
        let students = seed_students(&db, 2).await;

        ProxyAttempt::log(
            &db,
            attempt(Some(students[0].id), AttemptType::InvalidQr, "10.0.0.1", Some("dev-1")),
        )
        .await
        .unwrap();
        ProxyAttempt::log(
            &db,
            attempt(Some(students[0].id), AttemptType::InvalidQr, "10.0.0.2", Some("dev-1")),
        )
        .await
        .unwrap();
        let mut gps = attempt(Some(students[1].id), AttemptType::GpsRequired, "10.0.0.1", None);
        gps.failure_reason = "No GPS fix".to_owned();
        ProxyAttempt::log(&db, gps).await.unwrap();

        let analysis = analyze(&db, whole_window()).await.unwrap();

        assert_eq!(analysis.stats.total_attempts, 3);
        assert_eq!(analysis.stats.by_attempt_type.get("INVALID_QR"), Some(&2));
        assert_eq!(analysis.stats.by_attempt_type.get("GPS_REQUIRED"), Some(&1));
        assert_eq!(analysis.stats.distinct_students, 2);
        assert_eq!(analysis.stats.distinct_ips, 2);
        assert_eq!(analysis.stats.distinct_devices, 1);
        assert_eq!(analysis.stats.hourly_histogram.iter().sum::<u64>(), 3);
        assert_eq!(analysis.stats.daily_trend.iter().map(|d| d.count).sum::<u64>(), 3);
        assert_eq!(analysis.stats.top_failure_reasons[0].reason, "rejected");
        assert_eq!(analysis.stats.top_failure_reasons[0].count, 2);
        assert_eq!(analysis.attempts.len(), 3);
    }

    #[tokio::test]
    async fn high_frequency_fires_at_the_threshold_and_scales() {
        let db = setup_test_db().await;
        let students = seed_students(&db, 3).await;
        let (a, b, c) = (&students[0], &students[1], &students[2]);

        // Distinct IPs so no sharing pattern muddies the result.
        for _ in 0..5 {
            ProxyAttempt::log(&db, attempt(Some(a.id), AttemptType::InvalidQr, "10.0.0.1", None))
                .await
                .unwrap();
        }
        for _ in 0..20 {
            ProxyAttempt::log(&db, attempt(Some(b.id), AttemptType::InvalidQr, "10.0.0.2", None))
                .await
                .unwrap();
        }
        for _ in 0..4 {
            ProxyAttempt::log(&db, attempt(Some(c.id), AttemptType::InvalidQr, "10.0.0.3", None))
                .await
                .unwrap();
        }

        let analysis = analyze(&db, whole_window()).await.unwrap();
        let high: Vec<_> = analysis
            .patterns
            .iter()
            .filter_map(|p| match p {
                SuspiciousPattern::HighFrequency {
                    student_id,
                    severity,
                    attempt_count,
                    username,
                    ..
                } => Some((*student_id, *severity, *attempt_count, username.clone())),
                _ => None,
            })
            .collect();

        assert_eq!(high.len(), 2, "the four-attempt student stays unflagged");
        assert!(high.contains(&(a.id, Severity::Low, 5, a.username.clone())));
        assert!(high.contains(&(b.id, Severity::Critical, 20, b.username.clone())));
    }

    #[tokio::test]
    async fn multiple_devices_counts_the_bound_device_too() {
        let db = setup_test_db().await;
        let students = seed_students(&db, 2).await;
        let (a, b) = (&students[0], &students[1]);

        db::models::student_device::Model::bind_if_absent(&db, a.id, "dev-0")
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(a.id), AttemptType::UnregisteredDevice, "10.0.0.1", Some("dev-1")))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(a.id), AttemptType::UnregisteredDevice, "10.0.0.1", Some("dev-2")))
            .await
            .unwrap();

        // Two devices and nothing bound: stays under the threshold of three.
        ProxyAttempt::log(&db, attempt(Some(b.id), AttemptType::UnregisteredDevice, "10.0.0.2", Some("dev-8")))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(b.id), AttemptType::UnregisteredDevice, "10.0.0.2", Some("dev-9")))
            .await
            .unwrap();

        let analysis = analyze(&db, whole_window()).await.unwrap();
        let multi: Vec<_> = analysis
            .patterns
            .iter()
            .filter_map(|p| match p {
                SuspiciousPattern::MultipleDevices {
                    student_id,
                    device_count,
                    severity,
                    ..
                } => Some((*student_id, *device_count, *severity)),
                _ => None,
            })
            .collect();

        assert_eq!(multi, vec![(a.id, 3, Severity::Low)]);
    }

    #[tokio::test]
    async fn shared_ip_and_shared_device_group_the_students_involved() {
        let db = setup_test_db().await;
        let students = seed_students(&db, 3).await;
        let (s1, s2, s3) = (&students[0], &students[1], &students[2]);

        ProxyAttempt::log(&db, attempt(Some(s1.id), AttemptType::InvalidQr, "196.21.0.7", Some("lab-pc-3")))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(s2.id), AttemptType::InvalidQr, "196.21.0.7", Some("lab-pc-3")))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(s3.id), AttemptType::InvalidQr, "196.21.0.7", None))
            .await
            .unwrap();

        let analysis = analyze(&db, whole_window()).await.unwrap();

        let ip = analysis
            .patterns
            .iter()
            .find_map(|p| match p {
                SuspiciousPattern::IpSharing { ip_address, student_count, students, .. } => {
                    Some((ip_address.clone(), *student_count, students.clone()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(ip.0, "196.21.0.7");
        assert_eq!(ip.1, 3);
        let ids: Vec<i64> = ip.2.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![s1.id, s2.id, s3.id]);
        assert_eq!(ip.2[0].username, s1.username);

        let device = analysis
            .patterns
            .iter()
            .find_map(|p| match p {
                SuspiciousPattern::DeviceSharing { device_fingerprint, student_count, .. } => {
                    Some((device_fingerprint.clone(), *student_count))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(device, ("lab-pc-3".to_owned(), 2));
    }

    #[tokio::test]
    async fn type_filter_narrows_and_limit_truncates_only_the_echo() {
        let db = setup_test_db().await;
        let students = seed_students(&db, 2).await;

        ProxyAttempt::log(&db, attempt(Some(students[0].id), AttemptType::InvalidQr, "10.0.0.1", None))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(students[1].id), AttemptType::InvalidQr, "10.0.0.2", None))
            .await
            .unwrap();
        ProxyAttempt::log(&db, attempt(Some(students[0].id), AttemptType::AlreadyMarked, "10.0.0.1", None))
            .await
            .unwrap();

        let mut narrowed = whole_window();
        narrowed.attempt_type = Some(AttemptType::InvalidQr);
        let analysis = analyze(&db, narrowed).await.unwrap();
        assert_eq!(analysis.stats.total_attempts, 2);
        assert!(analysis.attempts.iter().all(|r| r.attempt_type == AttemptType::InvalidQr));

        let mut capped = whole_window();
        capped.limit = Some(1);
        let analysis = analyze(&db, capped).await.unwrap();
        assert_eq!(analysis.attempts.len(), 1);
        assert_eq!(analysis.stats.total_attempts, 3, "stats ignore the echo cap");
    }

    #[test]
    fn severity_scales_with_multiples_of_the_threshold() {
        assert_eq!(severity_for(5, 5), Severity::Low);
        assert_eq!(severity_for(9, 5), Severity::Low);
        assert_eq!(severity_for(10, 5), Severity::Medium);
        assert_eq!(severity_for(15, 5), Severity::High);
        assert_eq!(severity_for(20, 5), Severity::Critical);
        assert_eq!(severity_for(2, 2), Severity::Low);
        assert_eq!(severity_for(4, 2), Severity::Medium);
    }

    #[test]
    fn patterns_serialize_with_type_tags() {
        let pattern = SuspiciousPattern::HighFrequency {
            severity: Severity::Critical,
            description: "20 rejected attempts by one student in the analysis window".to_owned(),
            student_id: 7,
            username: "u00000007".to_owned(),
            attempt_count: 20,
        };
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["type"], "high_frequency");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["attempt_count"], 20);
    }
}
