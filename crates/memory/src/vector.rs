//! Vector similarity and ranking.

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank candidate embeddings against a query.
///
/// `candidates` yields `(position, embedding)`; positions without an
/// embedding are skipped. The result is `(position, score)` by descending
/// score. The sort is stable, so equal scores keep candidate order.
pub fn vector_search<'a, I>(candidates: I, query_embedding: &[f32], limit: usize) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = (usize, Option<&'a [f32]>)>,
{
    let mut scored: Vec<(usize, f32)> = candidates
        .into_iter()
        .filter_map(|(pos, emb)| Some((pos, cosine_similarity(emb?, query_embedding))))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
