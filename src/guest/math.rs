//! Small vector and matrix helpers (column-major, like GL expects)

pub type Vec3 = [f64; 3];

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm2(a: Vec3) -> f64 {
    dot(a, a)
}

pub fn norm(a: Vec3) -> f64 {
    norm2(a).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f64; 16]);

impl Mat4 {
    pub fn identity() -> Self {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        Mat4(m)
    }

    #[inline(always)]
    fn at(&self, row: usize, col: usize) -> f64 {
        self.0[col * 4 + row]
    }

    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut m = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                m[col * 4 + row] = (0..4).map(|k| self.at(row, k) * rhs.at(k, col)).sum();
            }
        }
        Mat4(m)
    }

    pub fn perspective(fovy: f64, aspect: f64, near: f64, far: f64) -> Mat4 {
        let f = 1.0 / (fovy / 2.0).tan();
        let mut m = [0.0; 16];
        m[0] = f / aspect;
        m[5] = f;
        m[10] = (far + near) / (near - far);
        m[11] = -1.0;
        m[14] = 2.0 * far * near / (near - far);
        Mat4(m)
    }

    pub fn translation(v: Vec3) -> Mat4 {
        let mut m = Mat4::identity();
        m.0[12] = v[0];
        m.0[13] = v[1];
        m.0[14] = v[2];
        m
    }

    pub fn scaling(v: Vec3) -> Mat4 {
        let mut m = Mat4::identity();
        m.0[0] = v[0];
        m.0[5] = v[1];
        m.0[10] = v[2];
        m
    }

    pub fn rotation_y(angle: f64) -> Mat4 {
        let (s, c) = angle.sin_cos();
        let mut m = Mat4::identity();
        m.0[0] = c;
        m.0[2] = -s;
        m.0[8] = s;
        m.0[10] = c;
        m
    }

    /// Rotation taking +z onto the direction of `v`
    pub fn rotation_from_z(v: Vec3) -> Mat4 {
        let len = norm(v);
        if len == 0.0 {
            return Mat4::identity();
        }
        let d = scale(v, 1.0 / len);
        let c = d[2];
        if c < -1.0 + 1e-12 {
            // antiparallel: half turn about x
            return Mat4::scaling([1.0, -1.0, -1.0]);
        }
        // Rodrigues with k = z × d, |k| = sin
        let k = [-d[1], d[0], 0.0];
        let f = 1.0 / (1.0 + c);
        let mut m = Mat4::identity();
        let kx = [[0.0, -k[2], k[1]], [k[2], 0.0, -k[0]], [-k[1], k[0], 0.0]];
        for row in 0..3 {
            for col in 0..3 {
                let kx2: f64 = (0..3).map(|i| kx[row][i] * kx[i][col]).sum();
                let id = if row == col { 1.0 } else { 0.0 };
                m.0[col * 4 + row] = id + kx[row][col] + kx2 * f;
            }
        }
        m
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let x = self.at(0, 0) * p[0] + self.at(0, 1) * p[1] + self.at(0, 2) * p[2] + self.at(0, 3);
        let y = self.at(1, 0) * p[0] + self.at(1, 1) * p[1] + self.at(1, 2) * p[2] + self.at(1, 3);
        let z = self.at(2, 0) * p[0] + self.at(2, 1) * p[1] + self.at(2, 2) * p[2] + self.at(2, 3);
        [x, y, z]
    }

    pub fn to_f32(&self) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        for (o, v) in out.iter_mut().zip(self.0.iter()) {
            *o = *v as f32;
        }
        out
    }

    /// Upper-left 3x3, column-major
    pub fn upper3_f32(&self) -> [f32; 9] {
        let mut out = [0.0f32; 9];
        for col in 0..3 {
            for row in 0..3 {
                out[col * 3 + row] = self.at(row, col) as f32;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        norm(sub(a, b)) < 1e-9
    }

    #[test]
    fn test_rotation_from_z() {
        for v in [[1.0, 0.0, 0.0], [0.0, -2.0, 0.0], [1.0, 1.0, 1.0], [0.0, 0.0, -3.0], [0.0, 0.0, 5.0]] {
            let r = Mat4::rotation_from_z(v);
            let expected = scale(v, 1.0 / norm(v));
            assert!(close(r.transform_point([0.0, 0.0, 1.0]), expected), "{:?}", v);
        }
    }

    #[test]
    fn test_translation_then_scale() {
        let m = Mat4::translation([1.0, 2.0, 3.0]).mul(&Mat4::scaling([2.0, 2.0, 2.0]));
        assert!(close(m.transform_point([1.0, 1.0, 1.0]), [3.0, 4.0, 5.0]));
    }

    #[test]
    fn test_cross() {
        assert_eq!(cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }
}
