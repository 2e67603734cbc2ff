//! # Python Bindings
//!
//! PyO3 bindings for MycoDB.
//!
//! ## Python API
//!
//! ```python
//! from mycodb import MycoDb
//!
//! db = MycoDb(width=64, height=64)
//! report = db.ingest_sql("chinook.sql")
//! print(report)
//!
//! # Focus on a payload and query its neighbourhood
//! db.goto(5)
//! db.set_radius(8.0)
//! rs = db.sql("SELECT * FROM Album")
//! for row in rs.rows():
//!     print(row)
//! print(rs.explain)
//!
//! # Pending changes
//! db.sql("UPDATE Album SET Title = 'x' WHERE AlbumId = 1")
//! db.merge()
//!
//! db.save("music.myco")
//! ```

use std::path::Path;

use pyo3::exceptions::{PyIOError, PyKeyError, PyValueError};
use pyo3::prelude::*;

use crate::core::config::MycoConfig;
use crate::core::{MycoError, Value};
use crate::engine::MycoDb;
use crate::query::{Outcome, ResultSet};
use crate::swarm::IngestReport;

fn to_py_err(err: MycoError) -> PyErr {
    match err {
        MycoError::Io(_) | MycoError::LoadFailure(_) | MycoError::VersionMismatch { .. } => {
            PyIOError::new_err(err.to_string())
        }
        MycoError::UnknownTable(_) | MycoError::UnknownColumn { .. } | MycoError::PayloadNotFound(_) => {
            PyKeyError::new_err(err.to_string())
        }
        other => PyValueError::new_err(other.to_string()),
    }
}

fn value_to_py(py: Python<'_>, value: &Value) -> PyObject {
    match value {
        Value::Null => py.None(),
        Value::Integer(i) => i.into_py(py),
        Value::Real(f) => f.into_py(py),
        Value::Text(s) => s.into_py(py),
    }
}

/// Query results
#[pyclass(name = "ResultSet")]
#[derive(Clone)]
pub struct PyResultSet {
    inner: ResultSet,
}

#[pymethods]
impl PyResultSet {
    #[getter]
    fn columns(&self) -> Vec<String> {
        self.inner.columns.clone()
    }

    /// Rows as lists of Python values (None for NULL)
    fn rows(&self, py: Python<'_>) -> Vec<Vec<PyObject>> {
        self.inner
            .rows
            .iter()
            .map(|row| row.iter().map(|v| value_to_py(py, v)).collect())
            .collect()
    }

    /// Explain line for the query that produced these rows
    #[getter]
    fn explain(&self) -> String {
        self.inner.explain.to_string()
    }

    fn to_csv(&self) -> String {
        self.inner.to_csv()
    }

    fn to_json(&self) -> String {
        self.inner.to_json()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __repr__(&self) -> String {
        format!("ResultSet(rows={}, strategy='{}')", self.inner.len(), self.inner.explain.strategy)
    }
}

/// Summary of a swarm run
#[pyclass(name = "IngestReport")]
#[derive(Clone)]
pub struct PyIngestReport {
    #[pyo3(get)]
    pub steps: usize,

    #[pyo3(get)]
    pub converged: bool,

    #[pyo3(get)]
    pub placed: usize,

    #[pyo3(get)]
    pub resolved: usize,

    #[pyo3(get)]
    pub dangling: usize,
}

impl From<&IngestReport> for PyIngestReport {
    fn from(r: &IngestReport) -> Self {
        Self {
            steps: r.steps,
            converged: r.converged,
            placed: r.placed,
            resolved: r.resolved,
            dangling: r.dangling_count(),
        }
    }
}

#[pymethods]
impl PyIngestReport {
    fn __repr__(&self) -> String {
        format!(
            "IngestReport(steps={}, converged={}, placed={}, resolved={}, dangling={})",
            self.steps, self.converged, self.placed, self.resolved, self.dangling
        )
    }
}

/// Python wrapper for the engine
#[pyclass(name = "MycoDb")]
pub struct PyMycoDb {
    inner: MycoDb,
}

#[pymethods]
impl PyMycoDb {
    #[new]
    #[pyo3(signature = (width=64, height=64, seed=None, config_path=None))]
    fn new(width: usize, height: usize, seed: Option<u64>, config_path: Option<&str>) -> PyResult<Self> {
        let mut config = match config_path {
            Some(path) => MycoConfig::from_json_file(Path::new(path)).map_err(to_py_err)?,
            None => MycoConfig::new(width, height),
        };
        if let Some(seed) = seed {
            config = config.with_seed(seed);
        }
        let inner = MycoDb::with_config(config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Load a binary image, replacing the current state
    fn load(&mut self, path: &str) -> PyResult<()> {
        self.inner.load(Path::new(path)).map_err(to_py_err)
    }

    /// Save the base state (pending changes are not written)
    fn save(&mut self, path: &str) -> PyResult<()> {
        self.inner.save(Path::new(path)).map_err(to_py_err)
    }

    /// Ingest a SQL dump with an optional rules file
    #[pyo3(signature = (path, rules=None))]
    fn ingest_sql(&mut self, path: &str, rules: Option<&str>) -> PyResult<PyIngestReport> {
        let report = self
            .inner
            .ingest_sql(Path::new(path), rules.map(Path::new))
            .map_err(to_py_err)?;
        Ok(PyIngestReport::from(&report))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Primary-key lookup under the current focus
    fn lookup(&mut self, table: &str, id: i64) -> PyResult<PyResultSet> {
        let inner = self.inner.lookup(table, id).map_err(to_py_err)?;
        Ok(PyResultSet { inner })
    }

    /// Column-equality lookup; `value` is parsed like a SQL literal
    #[pyo3(signature = (column, value, table=None))]
    fn find(&mut self, column: &str, value: &str, table: Option<&str>) -> PyResult<PyResultSet> {
        let value = Value::parse_loose(value);
        let inner = match table {
            Some(t) => self.inner.find(t, column, &value),
            None => self.inner.find_any(column, &value),
        }
        .map_err(to_py_err)?;
        Ok(PyResultSet { inner })
    }

    /// Run a statement. SELECT returns a ResultSet; DML returns the number
    /// of records appended to the delta store.
    fn sql(&mut self, py: Python<'_>, text: &str) -> PyResult<PyObject> {
        match self.inner.sql(text).map_err(to_py_err)? {
            Outcome::Rows(inner) => Ok(Py::new(py, PyResultSet { inner })?.into_py(py)),
            Outcome::Mutations(ops) => Ok(ops.len().into_py(py)),
        }
    }

    fn explain(&self) -> Option<String> {
        self.inner.explain().map(|e| e.to_string())
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    #[pyo3(signature = (id, table=None))]
    fn goto(&mut self, id: i64, table: Option<&str>) -> PyResult<(f32, f32)> {
        let pos = self.inner.goto(id, table).map_err(to_py_err)?;
        Ok((pos.x, pos.y))
    }

    fn set_radius(&mut self, radius: f32) {
        self.inner.set_radius(radius);
    }

    fn unfocus(&mut self) {
        self.inner.unfocus();
    }

    /// `(center or None, radius)`
    fn focus(&self) -> (Option<(f32, f32)>, f32) {
        let f = self.inner.focus();
        (f.center.map(|c| (c.x, c.y)), f.radius)
    }

    fn set_limit(&mut self, limit: Option<usize>) {
        self.inner.set_limit(limit);
    }

    // ------------------------------------------------------------------
    // Delta
    // ------------------------------------------------------------------

    fn delete(&mut self, table: &str, id: i64) -> PyResult<()> {
        self.inner.delete(table, id).map_err(to_py_err)?;
        Ok(())
    }

    /// Pending records as `(seq, table, id, kind)`
    fn show(&self) -> Vec<(u64, String, i64, &'static str)> {
        self.inner
            .show()
            .iter()
            .map(|r| {
                let table = self.inner.schema().name(r.key.table).unwrap_or("?").to_string();
                (r.seq, table, r.key.id, r.op.kind())
            })
            .collect()
    }

    fn undo(&mut self) -> PyResult<()> {
        self.inner.undo().map_err(to_py_err)?;
        Ok(())
    }

    /// Merge pending changes; returns the number of records applied
    fn merge(&mut self) -> usize {
        self.inner.merge().applied
    }

    fn set_auto_merge(&mut self, threshold: Option<usize>) {
        self.inner.set_auto_merge(threshold);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    fn tables(&self) -> Vec<String> {
        self.inner.table_names().into_iter().map(str::to_string).collect()
    }

    fn stats(&self) -> String {
        self.inner.stats().to_string()
    }

    fn describe(&mut self, table: &str) -> PyResult<String> {
        Ok(self.inner.describe(table).map_err(to_py_err)?.to_string())
    }

    fn __len__(&self) -> usize {
        self.inner.payload_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "MycoDb(tables={}, payloads={}, pending={})",
            self.inner.schema().len(),
            self.inner.payload_count(),
            self.inner.pending()
        )
    }
}

/// MycoDB Python module
#[pymodule]
fn mycodb(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyMycoDb>()?;
    m.add_class::<PyResultSet>()?;
    m.add_class::<PyIngestReport>()?;

    m.add("__doc__", "MycoDB: a spatial database laid out by a foraging swarm")?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
