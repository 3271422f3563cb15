//! Log-likelihood of the current assignments, reported between iterations.
//!
//! These only read rows and the summary row. The total is
//! `Σ doc + Σ word + normalize_word_log_likelihood`.

use std::f64;

use crate::doc_counter::DocCounter;
use crate::document::Document;
use crate::error::{LdaError, Result};
use crate::model::{ModelSlice, SummaryRow};

/// Symmetric prior used for the document term, independent of the
/// training alpha so values stay comparable across runs.
pub const LL_ALPHA: f64 = 0.01;

// Lanczos approximation with g = 7 and nine coefficients.
// C. Lanczos, "A Precision Approximation of the Gamma Function",
// SIAM Journal on Numerical Analysis, Series B, Volume 1, pp. 86--96, 1964.
// Coefficients from Paul Godfrey's notes on the Lanczos approximation:
// http://my.fit.edu/~gabdo/gamma.txt
pub fn log_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    let ln_sqrt_2pi = 0.5 * f64::ln(2.0 * f64::consts::PI);

    if f64::is_nan(x) || (x <= 0.0 && f64::floor(x) == x) {
        f64::NAN
    } else if x < 0.5 {
        // Reflection: Gamma(x) Gamma(1 - x) = pi / sin(pi x)
        f64::ln(f64::consts::PI / f64::abs(f64::sin(f64::consts::PI * x))) - log_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEF[0];
        let t = x + G + 0.5;
        for (i, &c) in COEF.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        ln_sqrt_2pi + (x + 0.5) * f64::ln(t) - t + f64::ln(a)
    }
}

/// `lnΓ(K·a) − K·lnΓ(a)` for the document prior.
pub fn log_doc_normalizer(num_topics: usize) -> f64 {
    log_gamma(num_topics as f64 * LL_ALPHA) - num_topics as f64 * log_gamma(LL_ALPHA)
}

/// Dirichlet-multinomial log-likelihood of one document's topic counts.
/// `counter` is scratch space and is overwritten.
pub fn doc_log_likelihood(doc: &Document, num_topics: usize, counter: &mut DocCounter) -> Result<f64> {
    counter.rebuild(doc, num_topics)?;
    let mut llh = log_doc_normalizer(num_topics);
    let mut nonzero = 0usize;
    for (topic, count) in counter.iter() {
        if count < 0 {
            return Err(LdaError::NegativeCount { topic, count: count as i64 });
        }
        llh += log_gamma(count as f64 + LL_ALPHA);
        nonzero += 1;
    }
    llh += (num_topics - nonzero) as f64 * log_gamma(LL_ALPHA);
    llh -= log_gamma(doc.len() as f64 + LL_ALPHA * num_topics as f64);
    Ok(llh)
}

/// Sum over the non-empty rows of a slice of `Σ_k lnΓ(n_wk + β)`.
pub fn word_log_likelihood(slice: &ModelSlice, beta: f64) -> Result<f64> {
    let num_topics = slice.num_topics();
    let log_gamma_beta = log_gamma(beta);
    let mut llh = 0.0;
    for (_, row) in slice.rows() {
        let mut nonzero = 0usize;
        for (topic, count) in row.iter() {
            if count < 0 {
                return Err(LdaError::NegativeCount { topic, count: count as i64 });
            }
            llh += log_gamma(count as f64 + beta);
            nonzero += 1;
        }
        if nonzero > 0 {
            llh += (num_topics - nonzero) as f64 * log_gamma_beta;
        }
    }
    Ok(llh)
}

/// The per-topic terms of the word likelihood, added once per evaluation.
pub fn normalize_word_log_likelihood(summary: &SummaryRow, beta: f64, num_vocabs: usize) -> Result<f64> {
    if num_vocabs == 0 {
        return Err(LdaError::Config("word likelihood needs a non-empty vocabulary".into()));
    }
    let beta_sum = beta * num_vocabs as f64;
    let num_topics = summary.num_topics() as f64;
    let mut llh = num_topics * (log_gamma(beta_sum) - num_vocabs as f64 * log_gamma(beta));
    for (topic, count) in summary.iter().enumerate() {
        if count < 0 {
            return Err(LdaError::NegativeCount { topic: topic as u32, count });
        }
        llh -= log_gamma(count as f64 + beta_sum);
    }
    Ok(llh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Token;
    use crate::model::ModelStore;
    use crate::vocab::LocalVocab;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * (1.0 + b.abs())
    }

    #[test]
    fn log_gamma_known_values() {
        assert!(close(log_gamma(1.0), 0.0));
        assert!(close(log_gamma(2.0), 0.0));
        assert!(close(log_gamma(0.5), 0.572_364_942_924_700_1));
        assert!(close(log_gamma(10.0), 12.801_827_480_081_469));
        assert!(log_gamma(0.0).is_nan());
        assert!(log_gamma(-2.0).is_nan());
    }

    #[test]
    fn log_gamma_recurrence() {
        for &x in &[0.01, 0.3, 1.7, 25.0, 1234.5] {
            assert!(close(log_gamma(x + 1.0), log_gamma(x) + f64::ln(x)), "x = {}", x);
        }
    }

    #[test]
    fn single_token_document_is_uniform_draw() {
        let doc = Document::new(vec![Token { word: 0, topic: 1 }]);
        let mut counter = DocCounter::default();
        let llh = doc_log_likelihood(&doc, 2, &mut counter).unwrap();
        assert!((llh - f64::ln(0.5)).abs() < 1e-9, "llh = {}", llh);
    }

    #[test]
    fn single_topic_model_is_certain() {
        let doc = Document::new((0..7).map(|_| Token { word: 0, topic: 0 }).collect());
        let mut counter = DocCounter::default();
        assert!(doc_log_likelihood(&doc, 1, &mut counter).unwrap().abs() < 1e-9);

        let docs = vec![doc];
        let vocab = LocalVocab::from_documents(&docs, 1, 2);
        let store = ModelStore::from_documents(&vocab, &docs).unwrap();
        let beta = 0.1;
        let word = word_log_likelihood(store.slice(0), beta).unwrap();
        let normalize = normalize_word_log_likelihood(store.summary(), beta, 1).unwrap();
        assert!((word + normalize).abs() < 1e-9);
    }

    #[test]
    fn empty_vocabulary_has_no_word_likelihood() {
        assert!(normalize_word_log_likelihood(&SummaryRow::new(3), 0.1, 0).is_err());
    }
}
