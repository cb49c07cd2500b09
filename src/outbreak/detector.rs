use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::cluster::{Cluster, dbscan};
use super::geo::{GeoPoint, geodesic_km};
use crate::config::OutbreakConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutbreakAlertRow {
    pub alert_id: Uuid,
    pub disease: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub case_count: i32,
    pub raised_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub const ALERT_COLUMNS: &str = r#"
    alert_id, disease, latitude, longitude, radius_km, case_count,
    raised_at, updated_at, resolved_at
"#;

/// An unresolved alert that can still absorb nearby clusters.
#[derive(Debug, Clone, Copy)]
pub struct OpenAlert {
    pub alert_id: Uuid,
    pub centroid: GeoPoint,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    Raise {
        alert_id: Uuid,
        centroid: GeoPoint,
        case_count: usize,
    },
    /// A duplicate of an open alert; only its case count moves.
    Refresh { alert_id: Uuid, case_count: usize },
}

/// Decide which clusters raise a new alert. A cluster is a duplicate when an
/// open alert raised within the window has its centroid within the radius;
/// alerts raised earlier in the same batch count as open.
pub fn plan_alerts(
    clusters: &[Cluster],
    open: &[OpenAlert],
    cfg: &OutbreakConfig,
    now: DateTime<Utc>,
) -> Vec<AlertDecision> {
    let window_start = now - Duration::days(cfg.window_days);
    let mut live: Vec<OpenAlert> = open
        .iter()
        .filter(|a| a.raised_at >= window_start)
        .copied()
        .collect();

    let mut decisions = Vec::new();
    for cluster in clusters.iter().filter(|c| c.len() >= cfg.min_cases) {
        let duplicate = live
            .iter()
            .map(|a| (a, geodesic_km(a.centroid, cluster.centroid)))
            .filter(|(_, d)| *d <= cfg.radius_km)
            .min_by(|(_, x), (_, y)| x.total_cmp(y))
            .map(|(a, _)| a.alert_id);

        match duplicate {
            Some(alert_id) => decisions.push(AlertDecision::Refresh {
                alert_id,
                case_count: cluster.len(),
            }),
            None => {
                let alert_id = Uuid::new_v4();
                live.push(OpenAlert {
                    alert_id,
                    centroid: cluster.centroid,
                    raised_at: now,
                });
                decisions.push(AlertDecision::Raise {
                    alert_id,
                    centroid: cluster.centroid,
                    case_count: cluster.len(),
                });
            }
        }
    }
    decisions
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterView {
    pub latitude: f64,
    pub longitude: f64,
    pub case_count: usize,
}

impl From<&Cluster> for ClusterView {
    fn from(c: &Cluster) -> Self {
        Self {
            latitude: c.centroid.latitude,
            longitude: c.centroid.longitude,
            case_count: c.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub disease: String,
    pub events: usize,
    pub clusters: Vec<ClusterView>,
    pub raised: Vec<Uuid>,
    pub refreshed: Vec<Uuid>,
}

#[derive(Debug, FromRow)]
struct EventPoint {
    latitude: f64,
    longitude: f64,
}

async fn load_clusters(
    conn: &mut PgConnection,
    cfg: &OutbreakConfig,
    disease: &str,
    now: DateTime<Utc>,
) -> Result<(usize, Vec<Cluster>), ApiError> {
    let rows: Vec<EventPoint> = sqlx::query_as::<_, EventPoint>(
        r#"
        SELECT latitude, longitude
        FROM prediction_event
        WHERE disease = $1
          AND predicted_at >= $2
        ORDER BY predicted_at ASC
        "#,
    )
    .bind(disease)
    .bind(now - Duration::days(cfg.window_days))
    .fetch_all(&mut *conn)
    .await
    .map_err(ApiError::db)?;

    let points: Vec<GeoPoint> = rows
        .iter()
        .filter_map(|r| GeoPoint::new(r.latitude, r.longitude).ok())
        .collect();
    let clusters = dbscan(&points, cfg.radius_km, cfg.min_cases);
    Ok((points.len(), clusters))
}

/// Current clusters of one disease within the window, without alerting.
pub async fn current_clusters(
    db: &PgPool,
    cfg: &OutbreakConfig,
    disease: &str,
    now: DateTime<Utc>,
) -> Result<(usize, Vec<Cluster>), ApiError> {
    let mut conn = db.acquire().await.map_err(ApiError::db)?;
    load_clusters(&mut *conn, cfg, disease, now).await
}

/// Cluster one disease and raise or refresh its alerts. Scans of the same
/// disease are serialised on a transaction-scoped advisory lock.
pub async fn scan_disease(db: &PgPool, cfg: &OutbreakConfig, disease: &str) -> Result<ScanReport, ApiError> {
    let mut tx = db.begin().await.map_err(ApiError::db)?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(disease)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    let now = Utc::now();
    let (events, clusters) = load_clusters(&mut *tx, cfg, disease, now).await?;

    let open_rows: Vec<OutbreakAlertRow> = sqlx::query_as::<_, OutbreakAlertRow>(&format!(
        r#"
        SELECT {ALERT_COLUMNS}
        FROM outbreak_alert
        WHERE disease = $1
          AND resolved_at IS NULL
        "#
    ))
    .bind(disease)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    let open: Vec<OpenAlert> = open_rows
        .iter()
        .filter_map(|r| {
            GeoPoint::new(r.latitude, r.longitude).ok().map(|centroid| OpenAlert {
                alert_id: r.alert_id,
                centroid,
                raised_at: r.raised_at,
            })
        })
        .collect();

    let decisions = plan_alerts(&clusters, &open, cfg, now);

    let mut raised = Vec::new();
    let mut refreshed = Vec::new();
    for decision in &decisions {
        match decision {
            AlertDecision::Raise {
                alert_id,
                centroid,
                case_count,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO outbreak_alert
                        (alert_id, disease, latitude, longitude, radius_km, case_count, raised_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                    "#,
                )
                .bind(alert_id)
                .bind(disease)
                .bind(centroid.latitude)
                .bind(centroid.longitude)
                .bind(cfg.radius_km)
                .bind(*case_count as i32)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::db)?;

                tracing::warn!(
                    %alert_id,
                    disease,
                    latitude = centroid.latitude,
                    longitude = centroid.longitude,
                    cases = case_count,
                    "outbreak alert raised"
                );
                raised.push(*alert_id);
            }
            AlertDecision::Refresh { alert_id, case_count } => {
                sqlx::query(
                    r#"
                    UPDATE outbreak_alert
                    SET case_count = GREATEST(case_count, $2),
                        updated_at = $3
                    WHERE alert_id = $1
                    "#,
                )
                .bind(alert_id)
                .bind(*case_count as i32)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::db)?;

                tracing::debug!(%alert_id, disease, cases = case_count, "duplicate outbreak alert suppressed");
                refreshed.push(*alert_id);
            }
        }
    }
    tx.commit().await.map_err(ApiError::db)?;

    Ok(ScanReport {
        disease: disease.to_string(),
        events,
        clusters: clusters.iter().map(ClusterView::from).collect(),
        raised,
        refreshed,
    })
}

/// Scan every disease seen within the window.
pub async fn scan_all(db: &PgPool, cfg: &OutbreakConfig) -> Result<Vec<ScanReport>, ApiError> {
    let diseases: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT disease
        FROM prediction_event
        WHERE predicted_at >= $1
        ORDER BY disease
        "#,
    )
    .bind(Utc::now() - Duration::days(cfg.window_days))
    .fetch_all(db)
    .await
    .map_err(ApiError::db)?;

    let mut reports = Vec::with_capacity(diseases.len());
    for disease in diseases {
        reports.push(scan_disease(db, cfg, &disease).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> OutbreakConfig {
        OutbreakConfig {
            radius_km: 5.0,
            min_cases: 3,
            window_days: 14,
        }
    }

    fn cluster_at(lat: f64, lon: f64, n: usize) -> Cluster {
        Cluster {
            members: (0..n).collect(),
            centroid: GeoPoint::new(lat, lon).unwrap(),
        }
    }

    fn alert_at(lat: f64, lon: f64, raised_at: DateTime<Utc>) -> OpenAlert {
        OpenAlert {
            alert_id: Uuid::new_v4(),
            centroid: GeoPoint::new(lat, lon).unwrap(),
            raised_at,
        }
    }

    #[test]
    fn raises_for_new_cluster_over_threshold() {
        let now = Utc::now();
        let decisions = plan_alerts(&[cluster_at(6.5, 3.4, 4)], &[], &cfg(), now);
        assert!(matches!(decisions.as_slice(), [AlertDecision::Raise { case_count: 4, .. }]));
    }

    #[test]
    fn ignores_clusters_below_threshold() {
        let decisions = plan_alerts(&[cluster_at(6.5, 3.4, 2)], &[], &cfg(), Utc::now());
        assert!(decisions.is_empty());
    }

    #[test]
    fn nearby_open_alert_suppresses_duplicate() {
        let now = Utc::now();
        let existing = alert_at(6.51, 3.4, now - Duration::days(2));
        let decisions = plan_alerts(&[cluster_at(6.5, 3.4, 7)], &[existing], &cfg(), now);
        assert_eq!(
            decisions,
            vec![AlertDecision::Refresh {
                alert_id: existing.alert_id,
                case_count: 7
            }]
        );
    }

    #[test]
    fn stale_or_distant_alerts_do_not_suppress() {
        let now = Utc::now();
        let stale = alert_at(6.5, 3.4, now - Duration::days(30));
        let far = alert_at(9.06, 7.49, now - Duration::hours(1));
        let decisions = plan_alerts(&[cluster_at(6.5, 3.4, 5)], &[stale, far], &cfg(), now);
        assert!(matches!(decisions.as_slice(), [AlertDecision::Raise { .. }]));
    }

    #[test]
    fn batch_does_not_raise_twice_for_the_same_place() {
        let now = Utc::now();
        let clusters = [cluster_at(6.5, 3.4, 6), cluster_at(6.52, 3.41, 3)];
        let decisions = plan_alerts(&clusters, &[], &cfg(), now);
        assert_eq!(decisions.len(), 2);
        let AlertDecision::Raise { alert_id, .. } = decisions[0] else {
            panic!("first cluster should raise");
        };
        assert_eq!(
            decisions[1],
            AlertDecision::Refresh {
                alert_id,
                case_count: 3
            }
        );
    }

    #[test]
    fn picks_the_closest_open_alert() {
        let now = Utc::now();
        let near = alert_at(6.501, 3.4, now);
        let less_near = alert_at(6.53, 3.4, now);
        let decisions = plan_alerts(&[cluster_at(6.5, 3.4, 3)], &[less_near, near], &cfg(), now);
        assert_eq!(
            decisions,
            vec![AlertDecision::Refresh {
                alert_id: near.alert_id,
                case_count: 3
            }]
        );
    }
}

#[cfg(test)]
mod db_tests {
    use super::*;
    use crate::db::testing;
    use crate::models::Role;

    fn cfg() -> OutbreakConfig {
        OutbreakConfig {
            radius_km: 5.0,
            min_cases: 3,
            window_days: 14,
        }
    }

    /// `n` events a few hundred metres apart around Lagos, `age_days` old.
    async fn seed_events(pool: &PgPool, user_id: Uuid, disease: &str, n: usize, age_days: i64) {
        for i in 0..n {
            sqlx::query(
                r#"
                INSERT INTO prediction_event (prediction_id, user_id, disease, latitude, longitude, predicted_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(disease)
            .bind(6.5244 + i as f64 * 0.001)
            .bind(3.3792)
            .bind(Utc::now() - Duration::days(age_days))
            .execute(pool)
            .await
            .unwrap();
        }
    }

    async fn open_alerts(pool: &PgPool, disease: &str) -> Vec<OutbreakAlertRow> {
        sqlx::query_as::<_, OutbreakAlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM outbreak_alert WHERE disease = $1 AND resolved_at IS NULL"
        ))
        .bind(disease)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    async fn cleanup(pool: &PgPool, disease: &str, user_id: Uuid) {
        sqlx::query("DELETE FROM outbreak_alert WHERE disease = $1")
            .bind(disease)
            .execute(pool)
            .await
            .unwrap();
        testing::drop_accounts(pool, &[user_id]).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scans_raise_a_single_alert() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let user = testing::account(&pool, Role::Patient).await;
        let disease = format!("malaria-{}", Uuid::new_v4());
        seed_events(&pool, user, &disease, 5, 0).await;

        let scans: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let disease = disease.clone();
                tokio::spawn(async move { scan_disease(&pool, &cfg(), &disease).await })
            })
            .collect();
        let mut raised = 0;
        for scan in scans {
            raised += scan.await.unwrap().unwrap().raised.len();
        }

        assert_eq!(raised, 1);
        let alerts = open_alerts(&pool, &disease).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].case_count, 5);

        cleanup(&pool, &disease, user).await;
    }

    #[tokio::test]
    async fn refresh_keeps_the_larger_case_count() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let user = testing::account(&pool, Role::Patient).await;
        let disease = format!("cholera-{}", Uuid::new_v4());
        seed_events(&pool, user, &disease, 5, 0).await;

        let alert_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO outbreak_alert
                (alert_id, disease, latitude, longitude, radius_km, case_count, raised_at, updated_at)
            VALUES ($1, $2, 6.526, 3.3792, 5.0, 50, now() - interval '1 day', now() - interval '1 day')
            "#,
        )
        .bind(alert_id)
        .bind(&disease)
        .execute(&pool)
        .await
        .unwrap();

        let report = scan_disease(&pool, &cfg(), &disease).await.unwrap();
        assert!(report.raised.is_empty());
        assert_eq!(report.refreshed, vec![alert_id]);
        assert_eq!(open_alerts(&pool, &disease).await[0].case_count, 50);

        sqlx::query("UPDATE outbreak_alert SET case_count = 2 WHERE alert_id = $1")
            .bind(alert_id)
            .execute(&pool)
            .await
            .unwrap();
        scan_disease(&pool, &cfg(), &disease).await.unwrap();
        let alerts = open_alerts(&pool, &disease).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].case_count, 5);

        cleanup(&pool, &disease, user).await;
    }

    #[tokio::test]
    async fn events_outside_the_window_are_ignored() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let user = testing::account(&pool, Role::Patient).await;
        let disease = format!("dengue-{}", Uuid::new_v4());
        seed_events(&pool, user, &disease, 5, 30).await;

        let (events, clusters) = current_clusters(&pool, &cfg(), &disease, Utc::now()).await.unwrap();
        assert_eq!(events, 0);
        assert!(clusters.is_empty());

        let report = scan_disease(&pool, &cfg(), &disease).await.unwrap();
        assert!(report.raised.is_empty());
        assert!(open_alerts(&pool, &disease).await.is_empty());

        cleanup(&pool, &disease, user).await;
    }
}
