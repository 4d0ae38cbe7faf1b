// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 匀速模型卡尔曼滤波器
//! Constant-velocity Kalman filter over image-plane position
//!
//! 状态向量: [x, y, vx, vy] (像素, 像素/秒), 观测: [x, y]

use ndarray::{arr1, arr2, s, Array1, Array2};

/// 前向投影结果 (不修改滤波器)
#[derive(Clone, Debug)]
pub struct Projection {
    pub state: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl Projection {
    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }
}

/// 匀速卡尔曼滤波器
#[derive(Clone, Debug)]
pub struct ConstantVelocityKalman {
    /// 状态估计 [x, y, vx, vy]
    state: Array1<f64>,

    /// 估计误差协方差 4x4
    covariance: Array2<f64>,

    /// 过程噪声: 加速度标准差
    accel_std: f64,

    /// 观测噪声协方差 2x2
    measurement_cov: Array2<f64>,
}

impl ConstantVelocityKalman {
    /// 创建滤波器, 初始速度为 0
    ///
    /// # 参数
    /// - `position`: 初始位置 (通常为画面中心)
    /// - `accel_std`: 过程噪声 (像素/秒², 越小越平滑)
    /// - `measurement_std`: 观测噪声 (像素, 越大越平滑)
    /// - `position_var` / `velocity_var`: 初始协方差对角线
    pub fn new(
        position: (f64, f64),
        accel_std: f64,
        measurement_std: f64,
        position_var: f64,
        velocity_var: f64,
    ) -> Self {
        let r = measurement_std * measurement_std;
        Self {
            state: arr1(&[position.0, position.1, 0.0, 0.0]),
            covariance: Array2::from_diag(&arr1(&[
                position_var,
                position_var,
                velocity_var,
                velocity_var,
            ])),
            accel_std,
            measurement_cov: arr2(&[[r, 0.0], [0.0, r]]),
        }
    }

    /// 状态转移矩阵 F(dt)
    fn transition(dt: f64) -> Array2<f64> {
        arr2(&[
            [1.0, 0.0, dt, 0.0],
            [0.0, 1.0, 0.0, dt],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// 离散白噪声加速度模型的过程噪声 Q(dt)
    fn process_noise(&self, dt: f64) -> Array2<f64> {
        let q = self.accel_std * self.accel_std;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;
        let pp = dt4 / 4.0 * q;
        let pv = dt3 / 2.0 * q;
        let vv = dt2 * q;
        arr2(&[
            [pp, 0.0, pv, 0.0],
            [0.0, pp, 0.0, pv],
            [pv, 0.0, vv, 0.0],
            [0.0, pv, 0.0, vv],
        ])
    }

    /// 纯函数前向投影: 由当前状态和协方差推算 `dt` 秒后的结果
    pub fn project(&self, dt: f64) -> Projection {
        let f = Self::transition(dt);
        let state = f.dot(&self.state);
        let covariance = f.dot(&self.covariance).dot(&f.t()) + self.process_noise(dt);
        Projection { state, covariance }
    }

    /// 时间更新 (预测), 修改滤波器状态
    pub fn predict(&mut self, dt: f64) {
        let Projection { state, covariance } = self.project(dt);
        self.state = state;
        self.covariance = covariance;
    }

    /// 观测更新, 返回修正后的位置
    pub fn correct(&mut self, measurement: (f64, f64)) -> (f64, f64) {
        // 残差 y = z - Hx
        let innovation = arr1(&[
            measurement.0 - self.state[0],
            measurement.1 - self.state[1],
        ]);

        // S = HPH^T + R (H 取前两维)
        let s_mat = self.covariance.slice(s![0..2, 0..2]).to_owned() + &self.measurement_cov;
        let det = s_mat[[0, 0]] * s_mat[[1, 1]] - s_mat[[0, 1]] * s_mat[[1, 0]];
        if det.abs() < f64::EPSILON {
            return self.position();
        }
        let s_inv = arr2(&[
            [s_mat[[1, 1]] / det, -s_mat[[0, 1]] / det],
            [-s_mat[[1, 0]] / det, s_mat[[0, 0]] / det],
        ]);

        // 卡尔曼增益 K = P H^T S^-1 (4x2)
        let gain = self.covariance.slice(s![.., 0..2]).dot(&s_inv);

        // 状态更新: x = x + K y
        self.state = &self.state + &gain.dot(&innovation);

        // 协方差更新: P = (I - K H) P, 再对称化
        let mut kh = Array2::<f64>::zeros((4, 4));
        kh.slice_mut(s![.., 0..2]).assign(&gain);
        let updated = (Array2::<f64>::eye(4) - kh).dot(&self.covariance);
        let transposed = updated.t().to_owned();
        self.covariance = (updated + transposed) * 0.5;

        self.position()
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    /// 获取速度向量 (像素/秒)
    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_at(x: f64, y: f64) -> ConstantVelocityKalman {
        ConstantVelocityKalman::new((x, y), 800.0, 2.0, 10.0, 100.0)
    }

    #[test]
    fn test_projection_does_not_mutate() {
        let mut kf = filter_at(100.0, 100.0);
        for i in 1..=20 {
            kf.predict(0.1);
            kf.correct((100.0 + 10.0 * i as f64, 100.0));
        }
        let before = kf.position();
        let velocity = kf.velocity();
        let projected = kf.project(0.5);

        assert_eq!(kf.position(), before);
        assert!((projected.state[0] - (before.0 + velocity.0 * 0.5)).abs() < 1e-9);
        assert!(projected.covariance[[0, 0]] > kf.covariance[[0, 0]]);
    }

    #[test]
    fn test_zero_horizon_projection_is_identity() {
        let mut kf = filter_at(10.0, 20.0);
        kf.predict(0.033);
        kf.correct((15.0, 25.0));
        let (x, y) = kf.project(0.0).position();
        assert_eq!((x, y), kf.position());
    }

    #[test]
    fn test_velocity_is_learned_from_ramp() {
        let mut kf = filter_at(0.0, 0.0);
        let dt = 1.0 / 30.0;
        for i in 0..90 {
            let t = i as f64 * dt;
            kf.predict(dt);
            kf.correct((60.0 * t, -30.0 * t));
        }
        let (vx, vy) = kf.velocity();
        assert!((vx - 60.0).abs() < 1.0, "vx = {}", vx);
        assert!((vy + 30.0).abs() < 1.0, "vy = {}", vy);
    }

    #[test]
    fn test_covariance_stays_symmetric() {
        let mut kf = filter_at(0.0, 0.0);
        for i in 0..10 {
            kf.predict(0.05);
            kf.correct((i as f64, 2.0 * i as f64));
        }
        for r in 0..4 {
            for c in 0..4 {
                assert!((kf.covariance[[r, c]] - kf.covariance[[c, r]]).abs() < 1e-9);
            }
        }
    }
}
