//! Evolutionary search for a candidate grid approximating a target grid
//!
//! The search is generational: every offspring of a generation is produced
//! (blend crossover, Gaussian mutation) and scored before tournament selection
//! builds the next population. Scoring is a pure function of the candidate and
//! the target, so a generation is evaluated on the rayon pool; all random draws
//! happen on the calling thread, which keeps seeded runs reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::debug;

use crate::grid::{l1, Grid};
use crate::{CancelToken, PatternError, Period, Ratio, Result};

// ============================================================
// CONFIG
// ============================================================

/// Parameters of one evolutionary run. Passed by value; there is no global
/// operator registry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: Period,
    pub generations: usize,
    /// Per-gene probability of Gaussian mutation
    pub mutation_rate: Ratio,
    /// Per-pair probability of blend crossover
    pub crossover_rate: Ratio,
    /// Standard deviation of the mutation noise
    pub mutation_sigma: f64,
    /// Blend extent; mixing coefficient is drawn from [-alpha, 1 + alpha]
    pub blend_alpha: f64,
    pub tournament_size: Period,
    /// Carry the best individual seen so far into every new generation
    pub elitism: bool,
    pub seed: Option<u64>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: Period::new_const(100),
            generations: 50,
            mutation_rate: Ratio::new_const(0.2),
            crossover_rate: Ratio::new_const(0.5),
            mutation_sigma: 0.1,
            blend_alpha: 0.5,
            tournament_size: Period::new_const(3),
            elitism: true,
            seed: None,
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.mutation_sigma.is_finite() || self.mutation_sigma < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "mutation_sigma must be finite and >= 0, got {}",
                self.mutation_sigma
            )));
        }
        if !self.blend_alpha.is_finite() || self.blend_alpha < 0.0 {
            return Err(PatternError::InvalidConfig(format!(
                "blend_alpha must be finite and >= 0, got {}",
                self.blend_alpha
            )));
        }
        Ok(())
    }
}

// ============================================================
// CANDIDATE
// ============================================================

/// One individual: a flat gene vector whose length equals the target's cell count
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate(Vec<f64>);

impl Candidate {
    pub fn new(genes: Vec<f64>) -> Self {
        Self(genes)
    }

    #[inline]
    pub fn genes(&self) -> &[f64] {
        &self.0
    }

    /// Negative L1 distance to `target`; higher is better, 0 is a perfect fit
    pub fn fitness(&self, target: &Grid) -> Result<f64> {
        if self.0.len() != target.values().len() {
            return Err(PatternError::InsufficientData {
                need: target.values().len(),
                got: self.0.len(),
            });
        }
        Ok(self.score(target.values()))
    }

    #[inline]
    fn score(&self, target: &[f64]) -> f64 {
        -l1(&self.0, target)
    }
}

/// Candidate paired with its fitness; produced by a separate evaluation step
#[derive(Debug, Clone)]
struct Scored {
    candidate: Candidate,
    fitness: f64,
}

/// Outcome of [`evolve_detailed`]
#[derive(Debug, Clone)]
pub struct Evolution {
    /// Best candidate reshaped to the target's size
    pub best: Grid,
    pub best_fitness: f64,
    /// Best fitness of each generation's selected population
    pub history: Vec<f64>,
}

// ============================================================
// SEARCH
// ============================================================

/// Evolve a candidate grid approximating `target`
pub fn evolve(target: &Grid, config: &EvolutionConfig) -> Result<Grid> {
    evolve_detailed(target, config, &CancelToken::new()).map(|e| e.best)
}

/// Evolve a candidate grid, reporting its fitness and per-generation history.
/// `cancel` is checked before every generation.
pub fn evolve_detailed(
    target: &Grid,
    config: &EvolutionConfig,
    cancel: &CancelToken,
) -> Result<Evolution> {
    config.validate()?;
    let normal = Normal::new(0.0, config.mutation_sigma)
        .map_err(|e| PatternError::InvalidConfig(e.to_string()))?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let genes = target.values().len();
    let pop_size = config.population_size.get();

    let initial: Vec<Candidate> = (0..pop_size)
        .map(|_| Candidate((0..genes).map(|_| rng.gen::<f64>()).collect()))
        .collect();
    let mut population = evaluate(initial, target);
    let mut elite = fittest(&population).clone();
    let mut history = Vec::with_capacity(config.generations);

    for generation in 0..config.generations {
        cancel.check()?;

        let offspring = vary(&population, config, &normal, &mut rng);
        let scored = evaluate(offspring, target);

        let generation_best = fittest(&scored);
        if generation_best.fitness > elite.fitness {
            elite = generation_best.clone();
        }

        let mut next = tournament(&scored, pop_size, config.tournament_size.get(), &mut rng);
        if config.elitism {
            next[0] = elite.clone();
        }

        let best = fittest(&next).fitness;
        debug!(generation, best_fitness = best, "generation selected");
        history.push(best);
        population = next;
    }

    let best = fittest(&population).clone();
    Ok(Evolution {
        best: Grid::from_parts(target.size(), best.candidate.0),
        best_fitness: best.fitness,
        history,
    })
}

/// Score every candidate in parallel; returns in input order
fn evaluate(candidates: Vec<Candidate>, target: &Grid) -> Vec<Scored> {
    let target = target.values();
    candidates
        .into_par_iter()
        .map(|candidate| {
            let fitness = candidate.score(target);
            Scored { candidate, fitness }
        })
        .collect()
}

/// First individual with maximal fitness
fn fittest(population: &[Scored]) -> &Scored {
    let mut best = &population[0];
    for s in &population[1..] {
        if s.fitness > best.fitness {
            best = s;
        }
    }
    best
}

/// Clone the population, then apply pairwise blend crossover and per-gene mutation
fn vary(
    population: &[Scored],
    config: &EvolutionConfig,
    normal: &Normal<f64>,
    rng: &mut StdRng,
) -> Vec<Candidate> {
    let mut offspring: Vec<Candidate> = population.iter().map(|s| s.candidate.clone()).collect();

    for i in (1..offspring.len()).step_by(2) {
        if rng.gen::<f64>() < config.crossover_rate.get() {
            let (left, right) = offspring.split_at_mut(i);
            blend(&mut left[i - 1].0, &mut right[0].0, config.blend_alpha, rng);
        }
    }

    let rate = config.mutation_rate.get();
    for child in &mut offspring {
        for gene in child.0.iter_mut() {
            if rng.gen::<f64>() < rate {
                *gene = (*gene + normal.sample(rng)).clamp(0.0, 1.0);
            }
        }
    }

    offspring
}

fn blend(a: &mut [f64], b: &mut [f64], alpha: f64, rng: &mut StdRng) {
    for (x, y) in a.iter_mut().zip(b.iter_mut()) {
        let gamma = (1.0 + 2.0 * alpha) * rng.gen::<f64>() - alpha;
        let (x0, y0) = (*x, *y);
        *x = ((1.0 - gamma) * x0 + gamma * y0).clamp(0.0, 1.0);
        *y = (gamma * x0 + (1.0 - gamma) * y0).clamp(0.0, 1.0);
    }
}

/// Draw `count` winners with replacement; each tournament samples `size`
/// contestants, ties go to the lower population index.
fn tournament(scored: &[Scored], count: usize, size: usize, rng: &mut StdRng) -> Vec<Scored> {
    (0..count)
        .map(|_| {
            let mut winner = rng.gen_range(0..scored.len());
            for _ in 1..size {
                let challenger = rng.gen_range(0..scored.len());
                let (w, c) = (&scored[winner], &scored[challenger]);
                if c.fitness > w.fitness || (c.fitness == w.fitness && challenger < winner) {
                    winner = challenger;
                }
            }
            scored[winner].clone()
        })
        .collect()
}

// ============================================================
// TESTS
// ============================================================
