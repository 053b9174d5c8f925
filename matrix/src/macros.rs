/// Builds a [`Matrix`](crate::Matrix) from rows separated by `;`.
///
/// Panics when rows have different lengths.
#[macro_export]
macro_rules! matrix {
    ( $( $($val:expr),+ );* $(;)? ) => {
        {
            let mut data = Vec::<f64>::new();
            let mut rows = 0usize;
            let mut cols = 0usize;
            $(
                let row_data: Vec<f64> = vec![$($val),+];
                if rows == 0 {
                    cols = row_data.len();
                } else if cols != row_data.len() {
                    panic!("Inconsistent number of elements in the matrix rows");
                }
                data.extend(row_data);
                rows += 1;
            )*

            $crate::matrix::Matrix::from_macro_rows(rows, cols, data)
        }
    };
}
