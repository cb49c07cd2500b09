use std::collections::VecDeque;

use super::geo::{GeoPoint, geodesic_km, spherical_centroid};

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Indices into the input slice, ascending.
    pub members: Vec<usize>,
    pub centroid: GeoPoint,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Label {
    Unvisited,
    Noise,
    Member(usize),
}

fn neighbours(points: &[GeoPoint], i: usize, eps_km: f64) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, q)| geodesic_km(points[i], **q) <= eps_km)
        .map(|(j, _)| j)
        .collect()
}

/// DBSCAN with geodesic distance. A point is a core point when at least
/// `min_points` points (itself included) lie within `eps_km`. Noise points
/// are dropped. Clusters come back largest first.
pub fn dbscan(points: &[GeoPoint], eps_km: f64, min_points: usize) -> Vec<Cluster> {
    let min_points = min_points.max(1);
    let mut labels = vec![Label::Unvisited; points.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for i in 0..points.len() {
        if labels[i] != Label::Unvisited {
            continue;
        }
        let seeds = neighbours(points, i, eps_km);
        if seeds.len() < min_points {
            labels[i] = Label::Noise;
            continue;
        }

        let cluster_id = groups.len();
        let mut members = vec![i];
        labels[i] = Label::Member(cluster_id);

        let mut queue: VecDeque<usize> = seeds.into_iter().filter(|&j| j != i).collect();
        while let Some(j) = queue.pop_front() {
            match labels[j] {
                Label::Member(_) => continue,
                // border point
                Label::Noise => {
                    labels[j] = Label::Member(cluster_id);
                    members.push(j);
                    continue;
                }
                Label::Unvisited => {
                    labels[j] = Label::Member(cluster_id);
                    members.push(j);
                }
            }
            let reach = neighbours(points, j, eps_km);
            if reach.len() >= min_points {
                queue.extend(reach.into_iter().filter(|&k| !matches!(labels[k], Label::Member(_))));
            }
        }

        members.sort_unstable();
        groups.push(members);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .filter_map(|members| {
            let pts: Vec<GeoPoint> = members.iter().map(|&m| points[m]).collect();
            spherical_centroid(&pts).map(|centroid| Cluster { members, centroid })
        })
        .collect();
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then(a.members[0].cmp(&b.members[0])));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    /// Points roughly `step_km` apart going north from `origin`.
    fn line(origin: GeoPoint, n: usize, step_km: f64) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| p(origin.latitude + i as f64 * step_km / 110.574, origin.longitude))
            .collect()
    }

    #[test]
    fn separates_two_dense_groups_and_drops_noise() {
        let mut points = line(p(6.5, 3.4), 6, 0.5); // Lagos-ish
        points.extend(line(p(9.06, 7.49), 4, 0.3)); // Abuja-ish
        points.push(p(12.0, 8.5)); // isolated

        let clusters = dbscan(&points, 2.0, 3);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(clusters[1].members, vec![6, 7, 8, 9]);
        assert!(clusters.iter().all(|c| !c.members.contains(&10)));
    }

    #[test]
    fn chains_through_core_points() {
        // each neighbour 1 km apart, eps 1.2 km: a chain of 8 forms one cluster
        let points = line(p(0.0, 0.0), 8, 1.0);
        let clusters = dbscan(&points, 1.2, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 8);
    }

    #[test]
    fn border_point_joins_but_does_not_expand() {
        // 0,1,2 are tight; 3 is 0.95 km past 2 and reachable only from 2;
        // 4 is 1.5 km past 3
        let mut points = line(p(0.0, 0.0), 3, 0.1);
        points.push(p(points[2].latitude + 0.95 / 110.574, 0.0));
        points.push(p(points[3].latitude + 1.5 / 110.574, 0.0));

        let clusters = dbscan(&points, 1.0, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1, 2, 3]);
    }

    #[test]
    fn sparse_points_are_all_noise() {
        let points = line(p(40.0, -74.0), 5, 50.0);
        assert!(dbscan(&points, 5.0, 2).is_empty());
        assert!(dbscan(&[], 5.0, 2).is_empty());
    }

    #[test]
    fn centroid_sits_inside_the_cluster() {
        let points = line(p(10.0, 10.0), 5, 0.2);
        let clusters = dbscan(&points, 1.0, 5);
        assert_eq!(clusters.len(), 1);
        let c = clusters[0].centroid;
        assert!((c.latitude - points[2].latitude).abs() < 1e-6);
        assert!((c.longitude - 10.0).abs() < 1e-9);
    }
}
