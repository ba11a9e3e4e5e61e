use super::extractor::Embedding;

/// One enrolled identity with all of its stored templates.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub student_id: i64,
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub student_id: i64,
    pub name: String,
    pub similarity: f32,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Find the best gallery match for a query embedding.
///
/// An identity matches through its closest stored template, so enrollment
/// variance in pose and lighting does not penalize it. Across identities the
/// global maximum wins; ties keep the earlier gallery entry. Returns `None`
/// when the gallery is empty or nothing reaches `threshold`.
pub fn best_match(
    query: &[f32],
    gallery: &[GalleryEntry],
    threshold: f32,
) -> Option<MatchCandidate> {
    let mut best: Option<MatchCandidate> = None;

    for entry in gallery {
        let mut entry_best = 0.0f32;
        for stored in &entry.embeddings {
            let similarity = cosine_similarity(query, stored);
            entry_best = entry_best.max(similarity);
        }

        if entry.embeddings.is_empty() {
            continue;
        }

        let replace = match &best {
            Some(current) => entry_best > current.similarity,
            None => true,
        };
        if replace {
            best = Some(MatchCandidate {
                student_id: entry.student_id,
                name: entry.name.clone(),
                similarity: entry_best,
            });
        }
    }

    best.filter(|candidate| candidate.similarity >= threshold)
}
