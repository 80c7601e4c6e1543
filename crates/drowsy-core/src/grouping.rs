//! Clustering of raw sliding-window hits into final detections.
//!
//! Neighbouring windows that fire on the same object are merged into their
//! average rectangle; clusters with too few members are dropped, as are
//! weak clusters nested inside a stronger one.

use crate::types::Rect;

/// Relative tolerance used when comparing window hits.
pub const GROUP_EPS: f64 = 0.2;

/// Two hits belong to the same object when all four edges lie within
/// `eps` of the mean of their smaller sides.
fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.right() - b.right()).abs() as f64) <= delta
        && ((a.bottom() - b.bottom()).abs() as f64) <= delta
}

/// Partition `rects` into equivalence classes of [`similar`].
///
/// Returns one label per rect; labels are numbered by first appearance.
fn partition(rects: &[Rect], eps: f64) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut root_label: Vec<Option<usize>> = vec![None; rects.len()];
    let mut labels = Vec::with_capacity(rects.len());
    let mut count = 0;
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        let label = *root_label[root].get_or_insert_with(|| {
            count += 1;
            count - 1
        });
        labels.push(label);
    }
    (labels, count)
}

/// Merge overlapping hits. Clusters need more than `group_threshold`
/// members to survive; a threshold of zero returns the input unchanged.
pub fn group_rectangles(rects: &[Rect], group_threshold: usize, eps: f64) -> Vec<Rect> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let (labels, nclasses) = partition(rects, eps);

    let mut sums = vec![[0i64; 4]; nclasses];
    let mut weights = vec![0usize; nclasses];
    for (rect, &cls) in rects.iter().zip(&labels) {
        sums[cls][0] += rect.x as i64;
        sums[cls][1] += rect.y as i64;
        sums[cls][2] += rect.width as i64;
        sums[cls][3] += rect.height as i64;
        weights[cls] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&weights)
        .map(|(s, &n)| {
            let inv = 1.0 / n as f64;
            Rect::new(
                (s[0] as f64 * inv).round() as i32,
                (s[1] as f64 * inv).round() as i32,
                (s[2] as f64 * inv).round() as i32,
                (s[3] as f64 * inv).round() as i32,
            )
        })
        .collect();

    let mut out = Vec::new();
    for i in 0..nclasses {
        let r1 = averaged[i];
        let n1 = weights[i];
        if n1 <= group_threshold {
            continue;
        }

        // Drop small clusters that sit inside a better-supported one.
        let nested = (0..nclasses).any(|j| {
            let n2 = weights[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.right() <= r2.right() + dx
                && r1.bottom() <= r2.bottom() + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !nested {
            out.push(r1);
        }
    }
    out
}
