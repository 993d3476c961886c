//! Board dimensions, difficulty levels and validated puzzles.

use std::fmt;

use crate::error::GameError;

/// Supported board sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BoardSize {
    #[default]
    Nine,
    Sixteen,
}

impl BoardSize {
    /// Symbols per row (9 or 16).
    pub fn side(self) -> usize {
        match self {
            BoardSize::Nine => 9,
            BoardSize::Sixteen => 16,
        }
    }

    /// Side of one box (3 or 4).
    pub fn box_side(self) -> usize {
        match self {
            BoardSize::Nine => 3,
            BoardSize::Sixteen => 4,
        }
    }

    pub fn cells(self) -> usize {
        self.side() * self.side()
    }

    pub fn from_side(side: u8) -> Option<Self> {
        match side {
            9 => Some(BoardSize::Nine),
            16 => Some(BoardSize::Sixteen),
            _ => None,
        }
    }
}

impl fmt::Display for BoardSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.side())
    }
}

/// Difficulty as exchanged between peers (codes 0, 1, 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn code(self) -> u8 {
        match self {
            Difficulty::Easy => 0,
            Difficulty::Medium => 1,
            Difficulty::Hard => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Difficulty::Easy),
            1 => Some(Difficulty::Medium),
            2 => Some(Difficulty::Hard),
            _ => None,
        }
    }

    /// Share of cells revealed by [`Puzzle::patterned`], in percent.
    fn revealed_percent(self) -> usize {
        match self {
            Difficulty::Easy => 50,
            Difficulty::Medium => 40,
            Difficulty::Hard => 30,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(name)
    }
}

/// A solvable board: the givens plus the full solution, row-major.
///
/// Only constructed through [`Puzzle::new`], so every instance has a valid
/// solution and givens that agree with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    size: BoardSize,
    /// `0` marks a cell the players have to fill.
    givens: Vec<u8>,
    solution: Vec<u8>,
}

impl Puzzle {
    pub fn new(size: BoardSize, givens: Vec<u8>, solution: Vec<u8>) -> Result<Self, GameError> {
        let cells = size.cells();
        if givens.len() != cells || solution.len() != cells {
            return Err(GameError::InvalidPuzzle(format!(
                "{size} board needs {cells} cells, got {} givens and {} solution values",
                givens.len(),
                solution.len()
            )));
        }
        check_solution(size, &solution)?;
        for (cell, (&given, &solved)) in givens.iter().zip(&solution).enumerate() {
            if given != 0 && given != solved {
                return Err(GameError::InvalidPuzzle(format!(
                    "given {given} at cell {cell} contradicts the solution"
                )));
            }
        }
        if givens.iter().all(|&g| g != 0) {
            return Err(GameError::InvalidPuzzle("no cell left to play".to_owned()));
        }
        Ok(Self {
            size,
            givens,
            solution,
        })
    }

    /// A puzzle built from the shifted-row pattern.  Cells are revealed by a
    /// fixed stride so both peers derive the same board from the settings.
    pub fn patterned(size: BoardSize, difficulty: Difficulty) -> Self {
        let (n, b) = (size.side(), size.box_side());
        let solution: Vec<u8> = (0..size.cells())
            .map(|i| {
                let (r, c) = (i / n, i % n);
                (((r % b) * b + r / b + c) % n + 1) as u8
            })
            .collect();
        let percent = difficulty.revealed_percent();
        let givens = solution
            .iter()
            .enumerate()
            .map(|(i, &v)| if (i * 37 + 11) % 100 < percent { v } else { 0 })
            .collect();
        Self {
            size,
            givens,
            solution,
        }
    }

    /// The same board with every symbol `v` replaced by `v + by` (wrapping).
    /// Relabelling symbols keeps a solution valid.
    pub fn relabelled(&self, by: usize) -> Self {
        let n = self.size.side();
        let shift = |v: u8| {
            if v == 0 {
                0
            } else {
                ((usize::from(v) - 1 + by) % n + 1) as u8
            }
        };
        Self {
            size: self.size,
            givens: self.givens.iter().map(|&v| shift(v)).collect(),
            solution: self.solution.iter().map(|&v| shift(v)).collect(),
        }
    }

    pub fn size(&self) -> BoardSize {
        self.size
    }

    pub fn givens(&self) -> &[u8] {
        &self.givens
    }

    pub fn solution(&self) -> &[u8] {
        &self.solution
    }

    pub fn is_given(&self, cell: usize) -> bool {
        self.givens.get(cell).is_some_and(|&g| g != 0)
    }

    /// Number of cells the players have to fill.
    pub fn open_cells(&self) -> usize {
        self.givens.iter().filter(|&&g| g == 0).count()
    }
}

/// Every row, column and box must hold each symbol exactly once.
fn check_solution(size: BoardSize, solution: &[u8]) -> Result<(), GameError> {
    let (n, b) = (size.side(), size.box_side());
    if let Some(bad) = solution.iter().find(|&&v| v == 0 || usize::from(v) > n) {
        return Err(GameError::InvalidPuzzle(format!(
            "solution value {bad} is not a symbol"
        )));
    }

    let unit_ok = |cells: &mut dyn Iterator<Item = usize>| {
        let mut seen = 0u32;
        for i in cells {
            seen |= 1 << (solution[i] - 1);
        }
        seen == (1u32 << n) - 1
    };

    for k in 0..n {
        let (box_row, box_col) = ((k / b) * b, (k % b) * b);
        let row = &mut (0..n).map(|c| k * n + c);
        let col = &mut (0..n).map(|r| r * n + k);
        let square = &mut (0..n).map(|j| (box_row + j / b) * n + box_col + j % b);
        if !unit_ok(row) || !unit_ok(col) || !unit_ok(square) {
            return Err(GameError::InvalidPuzzle(format!(
                "row, column or box {k} repeats a symbol"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterned_puzzles_are_valid() {
        for size in [BoardSize::Nine, BoardSize::Sixteen] {
            for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
                let p = Puzzle::patterned(size, difficulty);
                let rebuilt = Puzzle::new(size, p.givens().to_vec(), p.solution().to_vec());
                assert_eq!(rebuilt.as_ref(), Ok(&p), "{size} {difficulty}");
                assert!(p.open_cells() > 0);
            }
        }
    }

    #[test]
    fn harder_reveals_fewer_cells() {
        let easy = Puzzle::patterned(BoardSize::Nine, Difficulty::Easy);
        let hard = Puzzle::patterned(BoardSize::Nine, Difficulty::Hard);
        assert!(hard.open_cells() > easy.open_cells());
    }

    #[test]
    fn relabelled_puzzle_stays_valid() {
        let p = Puzzle::patterned(BoardSize::Nine, Difficulty::Medium);
        let q = p.relabelled(4);
        assert_ne!(p, q);
        assert_eq!(q.open_cells(), p.open_cells());
        assert!(Puzzle::new(q.size(), q.givens().to_vec(), q.solution().to_vec()).is_ok());
        assert_eq!(p.relabelled(9), p);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Puzzle::new(BoardSize::Nine, vec![0; 80], vec![1; 81]).unwrap_err();
        assert!(matches!(err, GameError::InvalidPuzzle(_)));
    }

    #[test]
    fn repeated_symbol_is_rejected() {
        let p = Puzzle::patterned(BoardSize::Nine, Difficulty::Easy);
        let mut solution = p.solution().to_vec();
        solution.swap(0, 1);
        assert!(Puzzle::new(BoardSize::Nine, vec![0; 81], solution).is_err());
    }

    #[test]
    fn contradicting_given_is_rejected() {
        let p = Puzzle::patterned(BoardSize::Nine, Difficulty::Easy);
        let mut givens = vec![0; 81];
        givens[0] = p.solution()[0] % 9 + 1;
        assert!(Puzzle::new(BoardSize::Nine, givens, p.solution().to_vec()).is_err());
    }

    #[test]
    fn difficulty_codes_round_trip() {
        for code in 0..3 {
            assert_eq!(Difficulty::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Difficulty::from_code(3), None);
        assert_eq!(BoardSize::from_side(16), Some(BoardSize::Sixteen));
        assert_eq!(BoardSize::from_side(12), None);
    }
}
