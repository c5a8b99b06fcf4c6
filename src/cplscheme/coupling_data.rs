//! Per-field bookkeeping for exchanged data

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::CouplingError;
use crate::mesh::{DataId, MeshData, MeshId};

/// History of one exchanged field
///
/// Column 0 of the history matrix holds the previous iterate. With
/// extrapolation enabled, columns 1 and 2 hold the converged values of the
/// last two time windows.
#[derive(Debug, Clone)]
pub struct CouplingData {
    data_id: DataId,
    dimension: usize,
    initialize: bool,
    old_values: DMatrix<f64>,
}

impl CouplingData {
    pub fn new(data: &MeshData, initialize: bool) -> Self {
        Self {
            data_id: data.id(),
            dimension: data.dimension(),
            initialize,
            old_values: DMatrix::zeros(0, 0),
        }
    }

    pub fn data_id(&self) -> DataId {
        self.data_id
    }

    pub fn mesh_id(&self) -> MeshId {
        self.data_id.mesh
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether this field is exchanged once during `initialize_data`
    pub fn requires_initialization(&self) -> bool {
        self.initialize
    }

    pub fn old_values(&self) -> &DMatrix<f64> {
        &self.old_values
    }

    pub fn is_allocated(&self) -> bool {
        self.old_values.ncols() > 0
    }

    /// Allocates a zeroed history with one row per value. Never reallocates.
    pub fn allocate(&mut self, rows: usize, columns: usize) {
        if self.is_allocated() {
            return;
        }
        debug!(data = %self.data_id, rows, columns, "CouplingData::allocate: called");
        self.old_values = DMatrix::zeros(rows, columns.max(1));
    }

    /// Column 0: the values seen at the previous exchange
    pub fn previous_iterate(&self) -> &[f64] {
        &self.old_values.as_slice()[..self.old_values.nrows()]
    }

    pub fn store_iterate(&mut self, values: &[f64]) -> Result<(), CouplingError> {
        self.check_rows(values.len())?;
        self.old_values.set_column(0, &DVector::from_column_slice(values));
        Ok(())
    }

    /// Replaces `values` with a prediction for the next time window and shifts
    /// the history. Returns the order actually used, which is limited by the
    /// number of completed windows.
    pub fn extrapolate(&mut self, values: &mut [f64], order: usize, timesteps: u32) -> Result<usize, CouplingError> {
        self.check_rows(values.len())?;
        let columns = self.old_values.ncols();
        let used = order.min(timesteps as usize).min(columns.saturating_sub(1));

        let current = DVector::from_column_slice(values);
        let predicted = match used {
            0 => current.clone(),
            1 => &current * 2.0 - self.old_values.column(1).clone_owned(),
            _ => {
                &current * 2.5 - self.old_values.column(1).clone_owned() * 2.0
                    + self.old_values.column(2).clone_owned() * 0.5
            }
        };
        debug!(data = %self.data_id, order, used, timesteps, "CouplingData::extrapolate: called");

        for col in (2..columns).rev() {
            let shifted = self.old_values.column(col - 1).clone_owned();
            self.old_values.set_column(col, &shifted);
        }
        if columns > 1 {
            self.old_values.set_column(1, &current);
        }
        self.old_values.set_column(0, &predicted);
        values.copy_from_slice(predicted.as_slice());
        Ok(used)
    }

    fn check_rows(&self, len: usize) -> Result<(), CouplingError> {
        if len != self.old_values.nrows() || !self.is_allocated() {
            return Err(CouplingError::protocol(format!(
                "data {} has {} values but its history holds {} rows",
                self.data_id,
                len,
                self.old_values.nrows()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use approx::assert_relative_eq;

    fn coupling_data(order: usize) -> CouplingData {
        let mut mesh = Mesh::new(MeshId(0), "M", 1);
        let id = mesh.create_data("X", 1);
        let mut cpl = CouplingData::new(mesh.data(id).unwrap(), false);
        cpl.allocate(1, order + 1);
        cpl
    }

    #[test]
    fn test_first_order_extrapolation() {
        let mut cpl = coupling_data(1);
        assert_eq!(cpl.old_values().ncols(), 2);

        let mut values = [1.0];
        cpl.extrapolate(&mut values, 1, 1).unwrap();
        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(cpl.old_values()[(0, 0)], 2.0);
        assert_relative_eq!(cpl.old_values()[(0, 1)], 1.0);

        let mut values = [4.0];
        cpl.extrapolate(&mut values, 1, 2).unwrap();
        assert_relative_eq!(values[0], 7.0);
        assert_relative_eq!(cpl.old_values()[(0, 0)], 7.0);
        assert_relative_eq!(cpl.old_values()[(0, 1)], 4.0);
    }

    #[test]
    fn test_second_order_extrapolation() {
        let mut cpl = coupling_data(2);
        assert_eq!(cpl.old_values().ncols(), 3);

        // only one completed window, so first order is used
        let mut values = [1.0];
        assert_eq!(cpl.extrapolate(&mut values, 2, 1).unwrap(), 1);
        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(cpl.old_values()[(0, 1)], 1.0);
        assert_relative_eq!(cpl.old_values()[(0, 2)], 0.0);

        let mut values = [4.0];
        assert_eq!(cpl.extrapolate(&mut values, 2, 2).unwrap(), 2);
        assert_relative_eq!(values[0], 8.0);
        assert_relative_eq!(cpl.old_values()[(0, 0)], 8.0);
        assert_relative_eq!(cpl.old_values()[(0, 1)], 4.0);
        assert_relative_eq!(cpl.old_values()[(0, 2)], 1.0);
    }

    #[test]
    fn test_store_iterate_and_size_check() {
        let mut cpl = coupling_data(0);
        cpl.store_iterate(&[3.5]).unwrap();
        assert_eq!(cpl.previous_iterate(), &[3.5]);
        assert!(cpl.store_iterate(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_allocate_never_reallocates() {
        let mut cpl = coupling_data(1);
        cpl.allocate(5, 4);
        assert_eq!(cpl.old_values().shape(), (1, 2));
    }
}
