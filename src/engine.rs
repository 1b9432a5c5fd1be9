//! Top-level pipeline tying the mapping preprocessor, the propositional
//! engine, and the gradient-boosted ensemble into one fit/predict surface
//! over a population and a single primary peripheral (spec §2's data
//! flow: mapping runs once, before any tree or propositional feature sees
//! the data, then both downstream components read the same
//! mapping-augmented view).
//!
//! Multi-peripheral composition is the same wiring repeated per
//! peripheral, each producing its own match array and mapping table
//! (composed further via `matching::compose_chain` for sub-joined
//! tables); it is not built out here, since every scenario in spec §8 and
//! the dense match/partition/tree core itself are single-peripheral
//! (recorded in DESIGN.md).

use std::sync::Arc;

use crate::config::Config;
use crate::ensemble::Ensemble;
use crate::error::{EngineError, Result};
use crate::mapping::{MappingAugmentedTable, MappingTable};
use crate::matching::{Match, MatchMaker};
use crate::propositional::FastProp;
use crate::reducer::{Reducer, SingleProcessReducer};
use crate::table::{validate_target_column, Schema, Table};
use crate::tree::TreeVariant;

/// Holds one population/peripheral pair's fitted components. Typestate is
/// tracked at runtime (`Option` fields checked on every call) rather than
/// at the type level, since `predict`/`transform_propositional` share one
/// concrete type across the fitted/unfitted lifecycle the way a
/// long-lived model handle would in the façade this core plugs into.
pub struct Engine {
    config: Config,
    reducer: Box<dyn Reducer>,
    population_schema: Option<Schema>,
    peripheral_schema: Option<Schema>,
    mapping: Option<MappingTable>,
    propositional: Option<FastProp>,
    ensemble: Option<Ensemble>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reducer: Box::new(SingleProcessReducer),
            population_schema: None,
            peripheral_schema: None,
            mapping: None,
            propositional: None,
            ensemble: None,
        })
    }

    /// Overrides the default single-process `Reducer` (spec §9's plug-in
    /// point for a distributed backend; not exercised by this crate, which
    /// ships only the single-process default).
    pub fn with_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn build_row_matches(&self, population: &dyn Table, peripheral: &dyn Table) -> Result<Vec<Vec<Match>>> {
        let delta_t = if self.config.delta_t > 0.0 { Some(self.config.delta_t) } else { None };
        let maker = MatchMaker::new(population, peripheral, delta_t)?;
        Ok((0..population.nrows())
            .map(|i| maker.build_matches(i).into_iter().map(|ix_per| Match::new(i as u32, ix_per)).collect())
            .collect())
    }

    /// Fits the mapping preprocessor, then FastProp, then a boosted tree
    /// ensemble against `target_col`, over `population` and one
    /// `peripheral` table.
    pub fn fit(&mut self, population: &dyn Table, peripheral: Arc<dyn Table>, target_col: usize, variant: TreeVariant) -> Result<()> {
        if population.nrows() == 0 {
            return Err(EngineError::InvalidArgument("population has zero rows".to_string()));
        }
        if target_col >= population.num_targets() {
            return Err(EngineError::SchemaMismatch(format!(
                "target column {target_col} out of range ({} targets)",
                population.num_targets()
            )));
        }
        validate_target_column(population, target_col)?;

        let row_matches = self.build_row_matches(population, peripheral.as_ref())?;

        // Mapping is a one-shot pass: fit once, then every downstream
        // component reads its output through the same augmented view.
        let mapping = MappingTable::fit(peripheral.as_ref(), population, &row_matches, &self.config, 0, |_| String::new());
        let augmented: Arc<dyn Table> = Arc::new(MappingAugmentedTable::new(Arc::clone(&peripheral), mapping.clone()));

        let propositional = FastProp::fit(population, augmented.as_ref(), &row_matches, target_col, &self.config);
        let ensemble = Ensemble::fit(population, augmented.as_ref(), &row_matches, None, self.reducer.as_ref(), &self.config, target_col, variant);

        self.population_schema = Some(population.schema().clone());
        self.peripheral_schema = Some(peripheral.schema().clone());
        self.mapping = Some(mapping);
        self.propositional = Some(propositional);
        self.ensemble = Some(ensemble);
        Ok(())
    }

    /// Predicts every population row's ensemble output. Fails with
    /// `NotFitted` before `fit`; `SchemaMismatch` if the transform-time
    /// tables' column counts diverge from what `fit` saw (spec §7).
    pub fn predict(&self, population: &dyn Table, peripheral: Arc<dyn Table>) -> Result<Vec<f64>> {
        let mapping = self.fitted_mapping()?;
        let ensemble = self.ensemble.as_ref().ok_or_else(not_fitted)?;
        self.check_schema(population, peripheral.as_ref())?;

        let row_matches = self.build_row_matches(population, peripheral.as_ref())?;
        let augmented: Arc<dyn Table> = Arc::new(MappingAugmentedTable::new(peripheral, mapping.clone()));
        Ok(ensemble.predict(population, augmented.as_ref(), &row_matches, None))
    }

    /// Materializes the fitted FastProp feature set for every population
    /// row (spec §4.7's `transform`).
    pub fn transform_propositional(&self, population: &dyn Table, peripheral: Arc<dyn Table>) -> Result<Vec<Vec<f64>>> {
        let mapping = self.fitted_mapping()?;
        let propositional = self.propositional.as_ref().ok_or_else(not_fitted)?;
        self.check_schema(population, peripheral.as_ref())?;

        let row_matches = self.build_row_matches(population, peripheral.as_ref())?;
        let augmented: Arc<dyn Table> = Arc::new(MappingAugmentedTable::new(peripheral, mapping.clone()));
        Ok(propositional.transform(population, augmented.as_ref(), &row_matches))
    }

    fn fitted_mapping(&self) -> Result<&MappingTable> {
        self.mapping.as_ref().ok_or_else(not_fitted)
    }

    fn check_schema(&self, population: &dyn Table, peripheral: &dyn Table) -> Result<()> {
        let pop_schema = self.population_schema.as_ref().ok_or_else(not_fitted)?;
        let per_schema = self.peripheral_schema.as_ref().ok_or_else(not_fitted)?;

        let pop_matches = population.num_categoricals() == pop_schema.categoricals.len()
            && population.num_numericals() == pop_schema.numericals.len()
            && population.num_discretes() == pop_schema.discretes.len()
            && population.num_time_stamps() == pop_schema.time_stamps.len();
        if !pop_matches {
            return Err(EngineError::SchemaMismatch("population column counts differ from training".to_string()));
        }

        let per_matches = peripheral.num_categoricals() == per_schema.categoricals.len()
            && peripheral.num_numericals() == per_schema.numericals.len()
            && peripheral.num_discretes() == per_schema.discretes.len()
            && peripheral.num_time_stamps() == per_schema.time_stamps.len();
        if !per_matches {
            return Err(EngineError::SchemaMismatch("wrong number of columns in peripheral table 0".to_string()));
        }
        Ok(())
    }
}

fn not_fitted() -> EngineError {
    EngineError::NotFitted("engine has not been fit".to_string())
}

impl Engine {
    /// Snapshots every fitted component into the portable document format
    /// (spec §6's persisted artifact). `NotFitted` before `fit`.
    pub fn to_document(&self, scores: std::collections::HashMap<String, f64>) -> Result<crate::persist::ModelDocument> {
        let population_schema = self.population_schema.clone().ok_or_else(not_fitted)?;
        let peripheral_schema = self.peripheral_schema.clone().ok_or_else(not_fitted)?;
        let mapping = self.mapping.clone().ok_or_else(not_fitted)?;
        Ok(crate::persist::ModelDocument {
            config: self.config.clone(),
            population_schema,
            peripheral_schemas: vec![peripheral_schema],
            propositional: self.propositional.clone(),
            ensemble: self.ensemble.clone(),
            mappings: vec![mapping],
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossFunction;
    use crate::table::{ColumnMeta, InMemoryTable};

    fn cfg() -> Config {
        let mut c = Config::default();
        c.allow_lagged_targets = Some(true);
        c.min_num_samples = 1;
        c.max_depth = 2;
        c.num_trees = 3;
        c.num_features = 2;
        c.loss_function = LossFunction::SquareLoss;
        c
    }

    fn tables() -> (InMemoryTable, Arc<dyn Table>) {
        let pop_schema = Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], ..Default::default() };
        let mut pop = InMemoryTable::new(4, pop_schema);
        pop.join_keys[0] = vec![1, 2, 3, 4];
        pop.targets[0] = vec![1.0, 2.0, 3.0, 4.0];

        let per_schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            numericals: vec![ColumnMeta::new("v", "")],
            categoricals: vec![ColumnMeta::new("cat", "")],
            ..Default::default()
        };
        let mut per = InMemoryTable::new(4, per_schema);
        per.join_keys[0] = vec![1, 2, 3, 4];
        per.numericals[0] = vec![1.0, 2.0, 3.0, 4.0];
        per.categoricals[0] = vec![5, 5, 6, 6];

        let per: Arc<dyn Table> = Arc::new(per);
        (pop, per)
    }

    #[test]
    fn predict_before_fit_is_not_fitted() {
        let engine = Engine::new(cfg()).unwrap();
        let (pop, per) = tables();
        let err = engine.predict(&pop, per).unwrap_err();
        assert!(matches!(err, EngineError::NotFitted(_)));
    }

    #[test]
    fn fit_then_predict_round_trips() {
        let mut engine = Engine::new(cfg()).unwrap();
        let (pop, per) = tables();
        engine.fit(&pop, Arc::clone(&per), 0, TreeVariant::Relboost).unwrap();
        let predictions = engine.predict(&pop, Arc::clone(&per)).unwrap();
        assert_eq!(predictions.len(), pop.nrows());
        assert!(predictions.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn schema_mismatch_is_rejected_at_predict() {
        let mut engine = Engine::new(cfg()).unwrap();
        let (pop, per) = tables();
        engine.fit(&pop, Arc::clone(&per), 0, TreeVariant::Relboost).unwrap();

        let wrong_schema = Schema {
            join_keys: vec![ColumnMeta::new("id", "")],
            numericals: vec![ColumnMeta::new("v", "")],
            categoricals: vec![ColumnMeta::new("cat", ""), ColumnMeta::new("extra", "")],
            ..Default::default()
        };
        let wrong: Arc<dyn Table> = Arc::new(InMemoryTable::new(4, wrong_schema));
        let err = engine.predict(&pop, wrong).unwrap_err();
        assert!(matches!(err, EngineError::SchemaMismatch(_)));
    }

    #[test]
    fn to_document_requires_fit_first() {
        let engine = Engine::new(cfg()).unwrap();
        assert!(matches!(engine.to_document(Default::default()).unwrap_err(), EngineError::NotFitted(_)));
    }

    #[test]
    fn to_document_after_fit_round_trips_through_json() {
        let mut engine = Engine::new(cfg()).unwrap();
        let (pop, per) = tables();
        engine.fit(&pop, per, 0, TreeVariant::Relboost).unwrap();
        let doc = engine.to_document(Default::default()).unwrap();
        let json = doc.to_json().unwrap();
        let reloaded = crate::persist::ModelDocument::from_json(&json).unwrap();
        assert_eq!(reloaded.to_json().unwrap(), json);
    }

    #[test]
    fn zero_row_population_is_rejected() {
        let mut engine = Engine::new(cfg()).unwrap();
        let (_, per) = tables();
        let empty_pop = InMemoryTable::new(0, Schema { join_keys: vec![ColumnMeta::new("id", "")], targets: vec![ColumnMeta::new("y", "")], ..Default::default() });
        let err = engine.fit(&empty_pop, per, 0, TreeVariant::Relboost).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
