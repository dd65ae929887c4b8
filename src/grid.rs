use crate::error::{ExpansionError, Result};

/// Row-major flat grid. No per-cell objects; site `(x, y)` lives at `x + y * w`.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    pub data: Vec<T>,
    pub w: usize,
    pub h: usize,
}

impl<T: Copy + Default> Grid<T> {
    pub fn new(w: usize, h: usize) -> Self {
        Self {
            data: vec![T::default(); w * h],
            w,
            h,
        }
    }
}

impl<T: Copy> Grid<T> {
    pub fn filled(w: usize, h: usize, v: T) -> Self {
        Self {
            data: vec![v; w * h],
            w,
            h,
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(w: usize, h: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != w * h {
            return Err(ExpansionError::malformed(format!(
                "grid buffer holds {} values, expected {}x{} = {}",
                data.len(),
                w,
                h,
                w * h
            )));
        }
        Ok(Self { data, w, h })
    }

    /// Build from column-major nested arrays indexed `[x][y]`, the layout
    /// used by the boundary layer.
    pub fn from_columns(columns: &[Vec<T>]) -> Result<Self> {
        let w = columns.len();
        let h = columns.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(w * h);
        for (x, col) in columns.iter().enumerate() {
            if col.len() != h {
                return Err(ExpansionError::malformed(format!(
                    "column {} has {} rows, expected {}",
                    x,
                    col.len(),
                    h
                )));
            }
        }
        for y in 0..h {
            for col in columns {
                data.push(col[y]);
            }
        }
        Ok(Self { data, w, h })
    }

    /// Inverse of [`Grid::from_columns`].
    pub fn to_columns(&self) -> Vec<Vec<T>> {
        (0..self.w)
            .map(|x| (0..self.h).map(|y| self.get(x, y)).collect())
            .collect()
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.w && y < self.h);
        y * self.w + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: T) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }
}

/// Neighborhood system of the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Connectivity {
    #[default]
    FourConnected,
    EightConnected,
}

impl Connectivity {
    /// Parse the boundary-layer value (4 or 8).
    pub fn from_degree(degree: u8) -> Result<Self> {
        match degree {
            4 => Ok(Connectivity::FourConnected),
            8 => Ok(Connectivity::EightConnected),
            other => Err(ExpansionError::malformed(format!(
                "connectivity must be 4 or 8, got {}",
                other
            ))),
        }
    }

    pub fn degree(self) -> u8 {
        match self {
            Connectivity::FourConnected => 4,
            Connectivity::EightConnected => 8,
        }
    }

    /// Forward directions, in enumeration order.
    pub fn directions(self) -> &'static [Direction] {
        match self {
            Connectivity::FourConnected => &Direction::ALL[..2],
            Connectivity::EightConnected => &Direction::ALL,
        }
    }
}

/// Forward edge direction. Every undirected edge is owned by the site it
/// leaves in one of these directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Right,
    Down,
    DownRight,
    DownLeft,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Right,
        Direction::Down,
        Direction::DownRight,
        Direction::DownLeft,
    ];

    #[inline]
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::DownRight => (1, 1),
            Direction::DownLeft => (-1, 1),
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Width, height and neighborhood of a site grid. Border edges that would
/// leave the grid do not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridTopology {
    pub width: usize,
    pub height: usize,
    pub connectivity: Connectivity,
}

impl GridTopology {
    pub fn new(width: usize, height: usize, connectivity: Connectivity) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ExpansionError::malformed(format!(
                "grid must be non-empty, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            connectivity,
        })
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn site(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    #[inline]
    pub fn coords(&self, site: usize) -> (usize, usize) {
        (site % self.width, site / self.width)
    }

    /// Site reached from `(x, y)` by stepping `(dx, dy)`, if inside the grid.
    #[inline]
    pub fn step(&self, x: usize, y: usize, (dx, dy): (i32, i32)) -> Option<usize> {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
            return None;
        }
        Some(self.site(nx as usize, ny as usize))
    }

    /// Neighbors along forward directions: right, down, then the two forward
    /// diagonals for 8-connectivity.
    pub fn forward_neighbors(&self, site: usize) -> impl Iterator<Item = (Direction, usize)> + '_ {
        let (x, y) = self.coords(site);
        self.connectivity
            .directions()
            .iter()
            .filter_map(move |&dir| self.step(x, y, dir.offset()).map(|n| (dir, n)))
    }

    /// Sites whose forward edge in some direction ends at `site`.
    pub fn backward_neighbors(&self, site: usize) -> impl Iterator<Item = (Direction, usize)> + '_ {
        let (x, y) = self.coords(site);
        self.connectivity.directions().iter().filter_map(move |&dir| {
            let (dx, dy) = dir.offset();
            self.step(x, y, (-dx, -dy)).map(|n| (dir, n))
        })
    }

    /// Whether the forward edge of `(x, y)` in `dir` stays inside the grid.
    #[inline]
    pub fn has_edge(&self, x: usize, y: usize, dir: Direction) -> bool {
        self.step(x, y, dir.offset()).is_some()
    }
}
